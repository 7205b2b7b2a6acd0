//! Front matter and template substitution.
//!
//! A template is a complete LaTeX document with `%%TOKEN%%` placeholders.
//! Three are compiled into the binary; a template directory can override any
//! of them by file name (`default.tex`, `chicago.tex`, `ieee.tex`).
//!
//! | Token | Value |
//! |-------|-------|
//! | `%%TITLE%%` | front-matter title |
//! | `%%AUTHORS%%` | authors joined with `\and` |
//! | `%%DATE%%` | date as written |
//! | `%%GEOMETRY%%` | `geometry` package options |
//! | `%%BIBLIOGRAPHY%%` | bibliography file stem |
//! | `%%TOC%%` | `\tableofcontents` when `toc: true` |
//! | `%%DOUBLE_SPACING%%` | `\doublespacing` when `double-spacing: true` |
//! | `%%ABSTRACT%%` | `abstract` environment |
//! | `%%KEYWORDS%%` | keyword block |
//! | `%%BODY%%` | rendered body |
//! | `%%APPENDIX%%` | rendered appendix |
//!
//! Absent values substitute to the empty string. Substitution is a single
//! pass, so placeholder-like text inside the body is never expanded.

use crate::config::Template;
use crate::error::{Diagnostic, Diagnostics, Md2LatexError};
use crate::pipeline::inline::{self, InlineContext};
use crate::pipeline::postprocess;
use crate::pipeline::render::Rendered;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::Path;

const DEFAULT_TEMPLATE: &str = include_str!("../../templates/default.tex");
const CHICAGO_TEMPLATE: &str = include_str!("../../templates/chicago.tex");
const IEEE_TEMPLATE: &str = include_str!("../../templates/ieee.tex");

static RE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"%%([A-Z_]+)%%").unwrap());

static RE_TOP_LEVEL_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][\w-]*)[ \t]*:[ \t]*(.*)$").unwrap());

// ── Front matter ─────────────────────────────────────────────────────────

/// Document metadata from the leading `---` YAML block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FrontMatter {
    #[serde(deserialize_with = "scalar")]
    pub title: Option<String>,
    #[serde(alias = "author", deserialize_with = "one_or_many")]
    pub authors: Vec<String>,
    #[serde(deserialize_with = "scalar")]
    pub date: Option<String>,
    #[serde(deserialize_with = "scalar")]
    pub geometry: Option<String>,
    #[serde(deserialize_with = "flag")]
    pub toc: bool,
    #[serde(rename = "double-spacing", alias = "double_spacing", deserialize_with = "flag")]
    pub double_spacing: bool,
    #[serde(rename = "abstract", deserialize_with = "scalar")]
    pub abstract_text: Option<String>,
    #[serde(alias = "keyword", deserialize_with = "one_or_many")]
    pub keywords: Vec<String>,
    #[serde(deserialize_with = "scalar")]
    pub template: Option<String>,
    /// Source line where each top-level key's value starts.
    #[serde(skip)]
    value_lines: Vec<(String, usize)>,
}

impl FrontMatter {
    /// Parse the YAML between the `---` fences; `first_line` is the source
    /// line of its first line. Empty input is an empty front matter.
    pub fn parse(yaml: &str, first_line: usize) -> Result<FrontMatter, Diagnostic> {
        if yaml.trim().is_empty() {
            return Ok(FrontMatter::default());
        }
        let mut front: FrontMatter = serde_yaml::from_str(yaml).map_err(|e| Diagnostic::InvalidFrontMatter {
            detail: e.to_string(),
            line: e.location().map_or(first_line, |l| first_line + l.line().saturating_sub(1)),
        })?;
        front.value_lines = value_lines(yaml, first_line);
        Ok(front)
    }

    /// Source line of the first of `keys` present, for placing diagnostics
    /// found inside its value. Line 1 when the key was not seen.
    fn line_of(&self, keys: &[&str]) -> usize {
        self.value_lines
            .iter()
            .find(|(key, _)| keys.contains(&key.as_str()))
            .map_or(1, |(_, line)| *line)
    }

    /// Template named by the `template:` key, validated like the CLI value.
    pub fn template(&self) -> Option<Result<Template, Md2LatexError>> {
        self.template.as_deref().map(str::parse)
    }

    /// Fields that are set, with the token each one feeds.
    fn set_fields(&self) -> Vec<(&'static str, &'static str)> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push(("title", "TITLE"));
        }
        if !self.authors.is_empty() {
            fields.push(("authors", "AUTHORS"));
        }
        if self.date.is_some() {
            fields.push(("date", "DATE"));
        }
        if self.geometry.is_some() {
            fields.push(("geometry", "GEOMETRY"));
        }
        if self.toc {
            fields.push(("toc", "TOC"));
        }
        if self.double_spacing {
            fields.push(("double-spacing", "DOUBLE_SPACING"));
        }
        if self.abstract_text.is_some() {
            fields.push(("abstract", "ABSTRACT"));
        }
        if !self.keywords.is_empty() {
            fields.push(("keywords", "KEYWORDS"));
        }
        fields
    }
}

/// Top-level keys and the line their value starts on. Block scalars
/// (`abstract: |`) and sequences start on the line after the key.
fn value_lines(yaml: &str, first_line: usize) -> Vec<(String, usize)> {
    yaml.lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let caps = RE_TOP_LEVEL_KEY.captures(line)?;
            let rest = caps[2].trim();
            let on_next_line = rest.is_empty() || rest.starts_with('|') || rest.starts_with('>');
            Some((caps[1].to_string(), first_line + i + usize::from(on_next_line)))
        })
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(value.as_ref().and_then(scalar_text).filter(|s| !s.is_empty()))
}

fn one_or_many<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let items = match Option::<Value>::deserialize(d)? {
        Some(Value::Sequence(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(other) => scalar_text(&other).into_iter().collect(),
        None => Vec::new(),
    };
    Ok(items.into_iter().filter(|s| !s.is_empty()).collect())
}

fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "on"),
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    })
}

// ── Loading ──────────────────────────────────────────────────────────────

/// Built-in text of `template`.
pub fn builtin(template: Template) -> &'static str {
    match template {
        Template::Default => DEFAULT_TEMPLATE,
        Template::Chicago => CHICAGO_TEMPLATE,
        Template::Ieee => IEEE_TEMPLATE,
    }
}

/// Template text, preferring `<dir>/<name>.tex` when it exists.
pub async fn load(template: Template, dir: Option<&Path>) -> Result<String, Md2LatexError> {
    if let Some(dir) = dir {
        let path = dir.join(template.file_name());
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!("Using template override {}", path.display());
            return tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| Md2LatexError::ReadFailed { path, source });
        }
        tracing::debug!("No {} in {}, using built-in", template.file_name(), dir.display());
    }
    Ok(builtin(template).to_string())
}

// ── Substitution ─────────────────────────────────────────────────────────

/// Everything a template is filled with.
#[derive(Debug, Clone, Copy)]
pub struct Substitution<'a> {
    pub front_matter: &'a FrontMatter,
    pub rendered: &'a Rendered,
    /// Bibliography file name without `.bib`.
    pub bibliography: &'a str,
}

/// Fill `source` and clean up the result.
///
/// Front-matter fields the template has no token for are reported as
/// warnings.
pub fn substitute(
    source: &str,
    sub: &Substitution<'_>,
    ctx: &InlineContext<'_>,
    diagnostics: &mut Diagnostics,
) -> Result<String, Md2LatexError> {
    let front = sub.front_matter;
    for (field, token) in front.set_fields() {
        if !source.contains(&format!("%%{token}%%")) {
            diagnostics.warn(Diagnostic::UnusedFrontMatter {
                field: field.to_string(),
                template: ctx.template.name().to_string(),
            });
        }
    }

    let values = token_values(sub, ctx, diagnostics)?;
    let filled = RE_TOKEN.replace_all(source, |caps: &Captures<'_>| match values.get(&caps[1]) {
        Some(value) => value.clone(),
        None => {
            tracing::debug!("Leaving unknown template token {}", &caps[0]);
            caps[0].to_string()
        }
    });
    Ok(postprocess::clean_latex(&filled))
}

fn token_values(
    sub: &Substitution<'_>,
    ctx: &InlineContext<'_>,
    diagnostics: &mut Diagnostics,
) -> Result<HashMap<&'static str, String>, Md2LatexError> {
    let front = sub.front_matter;
    let mut render = |text: &str, line: usize| inline::render_inline(text, ctx, line, diagnostics);

    let title = match front.title.as_deref() {
        Some(text) => render(text, front.line_of(&["title"]))?,
        None => String::new(),
    };
    let authors_line = front.line_of(&["authors", "author"]);
    let authors = front
        .authors
        .iter()
        .map(|a| render(a, authors_line))
        .collect::<Result<Vec<_>, _>>()?
        .join(" \\and ");
    let abstract_text = match front.abstract_text.as_deref() {
        Some(text) => format!(
            "\\begin{{abstract}}\n{}\n\\end{{abstract}}",
            render(text, front.line_of(&["abstract"]))?
        ),
        None => String::new(),
    };
    let keywords = if front.keywords.is_empty() {
        String::new()
    } else {
        let joined = front
            .keywords
            .iter()
            .map(|k| inline::escape_latex(k))
            .collect::<Vec<_>>()
            .join(", ");
        match ctx.template {
            Template::Ieee => format!("\\begin{{IEEEkeywords}}\n{joined}\n\\end{{IEEEkeywords}}"),
            Template::Default | Template::Chicago => format!("\\noindent\\textbf{{Keywords:}} {joined}"),
        }
    };

    let mut values = HashMap::new();
    values.insert("TITLE", title);
    values.insert("AUTHORS", authors);
    values.insert(
        "DATE",
        front.date.as_deref().map(inline::escape_latex).unwrap_or_default(),
    );
    values.insert("GEOMETRY", front.geometry.clone().unwrap_or_default());
    values.insert("BIBLIOGRAPHY", sub.bibliography.to_string());
    values.insert(
        "TOC",
        if front.toc {
            "\\tableofcontents\n\\newpage".to_string()
        } else {
            String::new()
        },
    );
    values.insert(
        "DOUBLE_SPACING",
        if front.double_spacing {
            "\\doublespacing".to_string()
        } else {
            String::new()
        },
    );
    values.insert("ABSTRACT", abstract_text);
    values.insert("KEYWORDS", keywords);
    values.insert("BODY", sub.rendered.body.clone());
    values.insert("APPENDIX", sub.rendered.appendix.clone());
    Ok(values)
}
