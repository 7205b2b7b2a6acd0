//! Doclet building: typed, labelled structural units from raw segments.
//!
//! A doclet is the unit every later phase works on. The builder visits each
//! large segment exactly once and:
//!
//! 1. pulls `caption:` / `label:` annotations off tables, code, math and
//!    quote blocks, checking the ones each kind requires;
//! 2. re-segments `Any` text with the small pattern set into headers, images
//!    and plain prose;
//! 3. registers every label in a [`LabelRegistry`] (duplicates are errors);
//! 4. turns image references into download/copy [`ResourceRequest`]s;
//! 5. scans for naked URLs and bracket-style citations.
//!
//! Problems are accumulated in the returned [`Diagnostics`]; the builder never
//! stops at the first one so an author sees the full list in one run.

use crate::error::{Diagnostic, Diagnostics};
use crate::pipeline::labels::{slugify, LabelKind, LabelRegistry};
use crate::pipeline::segment::{segment, PatternSet, Segment, SegmentKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Deepest header level with a LaTeX sectioning command.
pub const MAX_HEADER_DEPTH: usize = 4;

/// Kind of a doclet, with kind-specific data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DocletKind {
    Comment,
    Yaml,
    Table,
    Math,
    Literal,
    Code { language: String },
    Quote,
    List,
    Header { depth: usize, title: String },
    Image { path: String, alt: String },
    Plain,
}

impl DocletKind {
    pub fn name(&self) -> &'static str {
        match self {
            DocletKind::Comment => "comment",
            DocletKind::Yaml => "yaml",
            DocletKind::Table => "table",
            DocletKind::Math => "math",
            DocletKind::Literal => "literal",
            DocletKind::Code { .. } => "code",
            DocletKind::Quote => "quote",
            DocletKind::List => "list",
            DocletKind::Header { .. } => "header",
            DocletKind::Image { .. } => "image",
            DocletKind::Plain => "plain",
        }
    }

    /// Whether the doclet holds prose worth spellchecking.
    pub fn is_prose(&self) -> bool {
        matches!(
            self,
            DocletKind::Plain
                | DocletKind::Header { .. }
                | DocletKind::List
                | DocletKind::Quote
                | DocletKind::Table
        )
    }
}

/// One structural unit of the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Doclet {
    pub kind: DocletKind,
    pub label: Option<String>,
    pub caption: Option<String>,
    /// Payload without annotations or fences.
    pub content: String,
    /// First content doclet after an "Appendix" header.
    pub appendix: bool,
    /// 1-based source line.
    pub line: usize,
}

impl Doclet {
    fn new(kind: DocletKind, content: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            label: None,
            caption: None,
            content: content.into(),
            appendix: false,
            line,
        }
    }

    /// Whether this is a header titled "Appendix".
    pub fn is_appendix_header(&self) -> bool {
        matches!(&self.kind, DocletKind::Header { title, .. } if is_appendix_title(title))
    }
}

/// Where a referenced figure has to come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceSource {
    Download { url: String },
    Copy { path: PathBuf },
}

/// A figure to fetch into the output directory before compiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRequest {
    pub source: ResourceSource,
    pub dest: PathBuf,
    pub line: usize,
}

/// Inputs the builder needs besides the segments.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Directory of the Markdown file; local figures are relative to it.
    pub source_dir: PathBuf,
    /// Directory the `.tex` is written to.
    pub output_dir: PathBuf,
    pub auto_label_caption: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub doclets: Vec<Doclet>,
    pub labels: LabelRegistry,
    pub resources: Vec<ResourceRequest>,
    pub diagnostics: Diagnostics,
}

// ── Patterns ─────────────────────────────────────────────────────────────

static RE_ANNOTATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]*(caption|label)[ \t]*:[ \t]*(.*?)[ \t]*$").unwrap());

static RE_MATH_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]*%?[ \t]*\\label\{([^}]*)\}[ \t]*$").unwrap());

static RE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#+)[ \t]+(.*?)(?:[ \t]*\{#([^}\s]+)\})?[ \t]*$").unwrap());

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^!\[([^\]\n]*)\]\(([^)\s]+)(?:[ \t]+"([^"\n]*)")?\)$"#).unwrap()
});

static RE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>\[\]{}()"'`|]+"#).unwrap());

static RE_INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`\n]+`").unwrap());

static RE_INLINE_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$[^$\n]+\$").unwrap());

static RE_BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\[\]\n]+)\]").unwrap());

// ── Builder ──────────────────────────────────────────────────────────────

/// Build doclets from the large-scan `segments`.
pub fn build(segments: &[Segment], options: &BuildOptions) -> BuildOutput {
    let mut builder = Builder {
        options,
        out: BuildOutput::default(),
        appendix_pending: None,
        auto_counters: HashMap::new(),
    };

    for seg in segments {
        if !matches!(seg.kind, SegmentKind::Comment | SegmentKind::Yaml) {
            check_naked_urls(seg, &mut builder.out.diagnostics);
        }
        if matches!(
            seg.kind,
            SegmentKind::Any | SegmentKind::List | SegmentKind::Quote | SegmentKind::Table
        ) {
            check_bracket_citations(seg, &mut builder.out.diagnostics);
        }
        builder.segment(seg);
    }

    if let Some(line) = builder.appendix_pending {
        builder.out.diagnostics.warn(Diagnostic::DanglingAppendix { line });
    }

    tracing::debug!(
        "built {} doclets, {} labels, {} resources",
        builder.out.doclets.len(),
        builder.out.labels.len(),
        builder.out.resources.len()
    );
    builder.out
}

struct Builder<'a> {
    options: &'a BuildOptions,
    out: BuildOutput,
    /// Line of an "Appendix" header not yet followed by content.
    appendix_pending: Option<usize>,
    auto_counters: HashMap<&'static str, usize>,
}

impl Builder<'_> {
    fn segment(&mut self, seg: &Segment) {
        match seg.kind {
            SegmentKind::Comment => {
                let inner = seg
                    .text
                    .trim()
                    .trim_start_matches("<!--")
                    .trim_end_matches("-->");
                self.push(Doclet::new(DocletKind::Comment, inner.trim(), seg.line));
            }
            SegmentKind::Yaml => {
                let inner = seg
                    .text
                    .trim_end()
                    .strip_prefix("---")
                    .and_then(|s| s.strip_suffix("---"))
                    .unwrap_or(&seg.text);
                // First YAML line, past the opening fence.
                let skipped = inner.len() - inner.trim_start().len();
                let line = seg.line + inner[..skipped].matches('\n').count();
                self.push(Doclet::new(DocletKind::Yaml, inner.trim(), line));
            }
            SegmentKind::Table => self.table(seg),
            SegmentKind::Math => self.math(seg),
            SegmentKind::Literal => {
                let block = split_annotations(&seg.text, seg.line);
                let content = strip_fences(&block.body).1;
                self.push(Doclet::new(DocletKind::Literal, content, block.body_line));
            }
            SegmentKind::Code => self.code(seg),
            SegmentKind::Quote => self.quote(seg),
            SegmentKind::List => {
                let content = seg.text.trim_end_matches(['\n', ' ', '\t']);
                self.push(Doclet::new(DocletKind::List, content, seg.line));
            }
            SegmentKind::Any | SegmentKind::Header | SegmentKind::Image => self.any(seg),
        }
    }

    /// Append a doclet, consuming a pending appendix flag on content doclets.
    fn push(&mut self, mut doclet: Doclet) {
        let consumes = !matches!(
            doclet.kind,
            DocletKind::Header { .. } | DocletKind::Comment | DocletKind::Yaml
        );
        if consumes && self.appendix_pending.take().is_some() {
            doclet.appendix = true;
        }
        self.out.doclets.push(doclet);
    }

    fn register(&mut self, label: &str, kind: LabelKind, line: usize) {
        if let Err(duplicate) = self.out.labels.register(label, kind, line) {
            self.out.diagnostics.error(duplicate);
        }
    }

    /// Register a generated label, suffixing `-2`, `-3`... until it is free.
    fn register_generated(&mut self, base: &str, kind: LabelKind, line: usize) -> String {
        let mut label = base.to_string();
        let mut n = 2;
        while self.out.labels.contains(&label) {
            label = format!("{base}-{n}");
            n += 1;
        }
        self.register(&label, kind, line);
        label
    }

    fn next_auto(&mut self, prefix: &'static str) -> String {
        let counter = self.auto_counters.entry(prefix).or_insert(0);
        *counter += 1;
        format!("{prefix}-{counter}")
    }

    /// Apply the caption/label requirements of a block kind.
    fn require(
        &mut self,
        doclet: &mut Doclet,
        block: &Annotated,
        prefix: &'static str,
        need_caption: bool,
        need_label: bool,
        kind: LabelKind,
    ) {
        let name = doclet.kind.name().to_string();
        let line = doclet.line;
        doclet.caption = block.caption.clone();
        doclet.label = block.label.clone();

        if doclet.label.is_none() && (need_label || (need_caption && self.options.auto_label_caption && doclet.caption.is_none())) {
            if self.options.auto_label_caption {
                let label = self.next_auto(prefix);
                self.out.diagnostics.warn(Diagnostic::AutoLabel {
                    kind: name.clone(),
                    label: label.clone(),
                    line,
                });
                doclet.label = Some(label);
            } else if need_label {
                self.out.diagnostics.error(Diagnostic::MissingLabel {
                    kind: name.clone(),
                    line,
                });
            }
        }

        if doclet.caption.is_none() && need_caption {
            if self.options.auto_label_caption {
                let caption = doclet.label.clone().unwrap_or_else(|| name.clone());
                self.out.diagnostics.warn(Diagnostic::AutoCaption {
                    kind: name.clone(),
                    caption: caption.clone(),
                    line,
                });
                doclet.caption = Some(caption);
            } else {
                self.out.diagnostics.error(Diagnostic::MissingCaption { kind: name, line });
            }
        }

        if let Some(label) = doclet.label.clone() {
            self.register(&label, kind, line);
        }
    }

    fn table(&mut self, seg: &Segment) {
        let block = split_annotations(&seg.text, seg.line);
        let mut doclet = Doclet::new(DocletKind::Table, block.body.join("\n"), seg.line);
        self.require(&mut doclet, &block, "tbl", true, true, LabelKind::Table);
        self.push(doclet);
    }

    fn code(&mut self, seg: &Segment) {
        let block = split_annotations(&seg.text, seg.line);
        let (opening, content) = strip_fences(&block.body);
        let language = opening.trim().trim_start_matches('`').trim().to_string();
        let mut doclet = Doclet::new(DocletKind::Code { language }, content, seg.line);
        self.require(&mut doclet, &block, "code", true, true, LabelKind::Code);
        self.push(doclet);
    }

    fn quote(&mut self, seg: &Segment) {
        let block = split_annotations(&seg.text, seg.line);
        let content = block
            .body
            .iter()
            .map(|l| {
                let l = l.trim_start().trim_start_matches('>');
                l.strip_prefix(' ').unwrap_or(l)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let mut doclet = Doclet::new(DocletKind::Quote, content, seg.line);
        self.require(&mut doclet, &block, "quote", true, false, LabelKind::Quote);
        self.push(doclet);
    }

    fn math(&mut self, seg: &Segment) {
        let block = split_annotations(&seg.text, seg.line);
        let mut lines: Vec<&str> = block.body.clone();
        if lines.first().is_some_and(|l| l.trim() == "$$") {
            lines.remove(0);
        }
        if let Some(last) = lines.pop() {
            let stripped = last.trim_end().trim_end_matches("$$");
            if !stripped.trim().is_empty() {
                lines.push(stripped);
            }
        }

        let mut label = block.label.clone();
        let mut content = Vec::with_capacity(lines.len());
        for line in lines {
            match RE_MATH_LABEL.captures(line) {
                Some(caps) => {
                    if label.is_none() {
                        label = Some(caps[1].trim().to_string());
                    }
                }
                None => content.push(line),
            }
        }

        let mut doclet = Doclet::new(DocletKind::Math, content.join("\n"), seg.line);
        doclet.caption = block.caption.clone();
        doclet.label = label.filter(|l| !l.is_empty());
        if let Some(label) = doclet.label.clone() {
            self.register(&label, LabelKind::Equation, seg.line);
        }
        self.push(doclet);
    }

    /// Re-segment free text into headers, images and plain prose.
    fn any(&mut self, seg: &Segment) {
        for sub in segment(&seg.text, PatternSet::small(), seg.line) {
            match sub.kind {
                SegmentKind::Header => self.header(&sub),
                SegmentKind::Image => self.image(&sub),
                _ => self.plain(&sub),
            }
        }
    }

    fn plain(&mut self, sub: &Segment) {
        let trimmed = sub.text.trim_matches(['\n', '\r']);
        if trimmed.trim().is_empty() {
            return;
        }
        let leading_newlines = sub.text.len() - sub.text.trim_start_matches(['\n', '\r']).len();
        let line = sub.line + sub.text[..leading_newlines].matches('\n').count();
        self.push(Doclet::new(DocletKind::Plain, trimmed, line));
    }

    fn header(&mut self, sub: &Segment) {
        let text = sub.text.trim_end();
        let Some(caps) = RE_HEADER.captures(text) else {
            self.plain(sub);
            return;
        };
        let depth = caps[1].len();
        let title = caps[2].trim().to_string();
        let explicit = caps.get(3).map(|m| m.as_str().to_string());

        if depth > MAX_HEADER_DEPTH {
            self.out.diagnostics.error(Diagnostic::HeaderTooDeep {
                title,
                depth,
                line: sub.line,
            });
            return;
        }

        let mut doclet = Doclet::new(
            DocletKind::Header {
                depth,
                title: title.clone(),
            },
            title.clone(),
            sub.line,
        );

        if is_appendix_title(&title) {
            self.appendix_pending = Some(sub.line);
        } else if let Some(label) = explicit {
            self.register(&label, LabelKind::Header, sub.line);
            doclet.label = Some(label);
        } else {
            let slug = slugify(&title);
            let base = if slug.is_empty() {
                self.next_auto("href")
            } else {
                format!("href-{slug}")
            };
            doclet.label = Some(self.register_generated(&base, LabelKind::Header, sub.line));
        }
        self.push(doclet);
    }

    fn image(&mut self, sub: &Segment) {
        let Some(caps) = RE_IMAGE.captures(sub.text.trim()) else {
            self.plain(sub);
            return;
        };
        let alt = caps[1].trim().to_string();
        let raw_path = caps[2].to_string();
        let title = caps.get(3).map(|m| m.as_str().trim().to_string());

        if Path::new(&raw_path)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("svg"))
        {
            self.out.diagnostics.error(Diagnostic::ForbiddenImageExtension {
                path: raw_path,
                line: sub.line,
            });
            return;
        }

        let (render_path, request) = resolve_image(&raw_path, sub.line, self.options);
        if let Some(request) = request {
            self.out.resources.push(request);
        }

        let stem = Path::new(&render_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let slug = slugify(if alt.is_empty() { &stem } else { &alt });
        let base = if slug.is_empty() {
            self.next_auto("fig")
        } else {
            format!("fig-{slug}")
        };
        let label = self.register_generated(&base, LabelKind::Figure, sub.line);

        let mut doclet = Doclet::new(
            DocletKind::Image {
                path: render_path,
                alt: alt.clone(),
            },
            String::new(),
            sub.line,
        );
        doclet.caption = title.or((!alt.is_empty()).then_some(alt));
        doclet.label = Some(label);
        self.push(doclet);
    }
}

pub fn is_appendix_title(title: &str) -> bool {
    title.trim().eq_ignore_ascii_case("appendix")
}

// ── Annotations ──────────────────────────────────────────────────────────

/// A block with its `caption:` / `label:` lines pulled off.
#[derive(Debug, Clone)]
struct Annotated<'a> {
    caption: Option<String>,
    label: Option<String>,
    body: Vec<&'a str>,
    body_line: usize,
}

fn split_annotations(text: &str, first_line: usize) -> Annotated<'_> {
    let lines: Vec<&str> = text.lines().collect();
    let mut caption = None;
    let mut label = None;
    let mut record = |line: &str| -> bool {
        if line.trim().is_empty() {
            return true;
        }
        match RE_ANNOTATION.captures(line) {
            Some(caps) => {
                let value = caps[2].to_string();
                let slot = if &caps[1] == "caption" { &mut caption } else { &mut label };
                if slot.is_none() && !value.is_empty() {
                    *slot = Some(value);
                }
                true
            }
            None => false,
        }
    };

    let mut start = 0;
    while start < lines.len() && record(lines[start]) {
        start += 1;
    }
    let mut end = lines.len();
    while end > start && record(lines[end - 1]) {
        end -= 1;
    }

    Annotated {
        caption,
        label,
        body: lines[start..end].to_vec(),
        body_line: first_line + start,
    }
}

/// Split a fenced block into its opening fence line and the inner content.
fn strip_fences(body: &[&str]) -> (String, String) {
    let opening = body.first().map(|l| l.to_string()).unwrap_or_default();
    let inner = if body.len() >= 2 {
        body[1..body.len() - 1].join("\n")
    } else {
        String::new()
    };
    (opening, inner)
}

// ── Images ───────────────────────────────────────────────────────────────

/// Work out the path the `.tex` refers to and what has to be fetched.
fn resolve_image(raw: &str, line: usize, options: &BuildOptions) -> (String, Option<ResourceRequest>) {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        let name = url_filename(raw);
        let request = ResourceRequest {
            source: ResourceSource::Download { url: raw.to_string() },
            dest: options.output_dir.join(&name),
            line,
        };
        return (name, Some(request));
    }

    let given = Path::new(raw);
    let (source, relative) = if given.is_absolute() {
        let name = given
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| given.to_path_buf());
        (given.to_path_buf(), name)
    } else {
        (options.source_dir.join(given), given.to_path_buf())
    };
    let dest = options.output_dir.join(&relative);
    let render_path = relative.to_string_lossy().replace('\\', "/");

    if source == dest {
        return (render_path, None);
    }
    let request = ResourceRequest {
        source: ResourceSource::Copy { path: source },
        dest,
        line,
    };
    (render_path, Some(request))
}

/// File name for a downloaded figure, from the last URL path segment.
pub fn url_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    format!("figure-{}.png", slugify(url))
}

// ── Scans ────────────────────────────────────────────────────────────────

fn line_in(seg: &Segment, offset: usize) -> usize {
    seg.line + seg.text[..offset].matches('\n').count()
}

/// Blank out `re` matches (keeping offsets) so later scans skip them.
fn mask(text: &str, re: &Regex) -> String {
    let mut masked = text.to_string();
    for m in re.find_iter(text) {
        masked.replace_range(m.range(), &" ".repeat(m.len()));
    }
    masked
}

/// URLs must be wrapped: `[text](url)`, `<url>`, `{url}`, `[url]` or quoted.
fn check_naked_urls(seg: &Segment, diagnostics: &mut Diagnostics) {
    let masked = if matches!(seg.kind, SegmentKind::Code | SegmentKind::Literal) {
        seg.text.clone()
    } else {
        mask(&seg.text, &RE_INLINE_CODE)
    };
    for m in RE_URL.find_iter(&masked) {
        let before = &masked[..m.start()];
        let wrapped = before.ends_with("](")
            || before.ends_with('<')
            || before.ends_with('{')
            || before.ends_with('[')
            || before.ends_with('"')
            || before.ends_with('\'');
        if !wrapped {
            diagnostics.error(Diagnostic::NakedUrl {
                url: m.as_str().trim_end_matches(['.', ',', ';', ':']).to_string(),
                line: line_in(seg, m.start()),
            });
        }
    }
}

/// `[smith-2020]` is a citation in the wrong syntax; `[something]` might be.
fn check_bracket_citations(seg: &Segment, diagnostics: &mut Diagnostics) {
    let masked = mask(&mask(&seg.text, &RE_INLINE_CODE), &RE_INLINE_MATH);
    for caps in RE_BRACKET.captures_iter(&masked) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let before = &masked[..whole.start()];
        let after = &masked[whole.end()..];
        let content = inner.as_str().trim();

        let is_markup = before.ends_with('!')
            || before.ends_with(']')
            || after.starts_with('(')
            || after.starts_with('[')
            || after.starts_with(':')
            || content.starts_with('^')
            || content.eq_ignore_ascii_case("sic")
            || matches!(content, "" | "x" | "X")
            || inner.as_str() == " ";
        if is_markup {
            continue;
        }

        let line = line_in(seg, whole.start());
        let head = content.split(',').next().unwrap_or_default().trim();
        if head.contains('-') && !head.contains(char::is_whitespace) {
            diagnostics.error(Diagnostic::BracketCitation {
                content: content.to_string(),
                line,
            });
        } else {
            diagnostics.warn(Diagnostic::PossibleBracketCitation {
                content: content.to_string(),
                line,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> BuildOptions {
        BuildOptions {
            source_dir: PathBuf::from("/docs"),
            output_dir: PathBuf::from("/out"),
            auto_label_caption: false,
        }
    }

    fn build_str(text: &str, options: &BuildOptions) -> BuildOutput {
        let segments = segment(text, PatternSet::large(), 1);
        build(&segments, options)
    }

    #[test]
    fn table_with_caption_and_label() {
        let out = build_str(
            "caption: Results\nlabel: tbl-results\n| a | b |\n|---|---|\n| 1 | 2 |\n",
            &options(),
        );
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        assert_eq!(out.doclets.len(), 1);
        let table = &out.doclets[0];
        assert_eq!(table.kind, DocletKind::Table);
        assert_eq!(table.caption.as_deref(), Some("Results"));
        assert_eq!(table.label.as_deref(), Some("tbl-results"));
        assert_eq!(table.content, "| a | b |\n|---|---|\n| 1 | 2 |");
        assert_eq!(out.labels.resolve("TBL-RESULTS").unwrap().1, &LabelKind::Table);
    }

    #[test]
    fn table_without_annotations_reports_two_errors() {
        let out = build_str("text\n\n| a | b |\n|---|---|\n", &options());
        assert_eq!(
            out.diagnostics.errors,
            vec![
                Diagnostic::MissingLabel {
                    kind: "table".into(),
                    line: 3,
                },
                Diagnostic::MissingCaption {
                    kind: "table".into(),
                    line: 3,
                },
            ]
        );
    }

    #[test]
    fn trailing_annotations_are_accepted() {
        let out = build_str("```rust\nfn main() {}\n```\ncaption: Entry point\nlabel: code-main\n", &options());
        assert!(!out.diagnostics.has_errors(), "{:?}", out.diagnostics);
        let code = &out.doclets[0];
        assert_eq!(code.kind, DocletKind::Code { language: "rust".into() });
        assert_eq!(code.content, "fn main() {}");
        assert_eq!(code.label.as_deref(), Some("code-main"));
    }

    #[test]
    fn adjacent_annotated_blocks_keep_their_own_captions() {
        let out = build_str(
            "caption: Results\nlabel: tbl-results\n| a |\n|---|\ncaption: Entry point\nlabel: code-main\n```rust\nfn main() {}\n```\n",
            &options(),
        );
        assert!(!out.diagnostics.has_errors(), "{:?}", out.diagnostics);
        let captions: Vec<_> = out.doclets.iter().map(|d| d.caption.as_deref()).collect();
        assert_eq!(captions, vec![Some("Results"), Some("Entry point")]);
        let labels: Vec<_> = out.doclets.iter().map(|d| d.label.as_deref()).collect();
        assert_eq!(labels, vec![Some("tbl-results"), Some("code-main")]);
    }

    #[test]
    fn auto_label_caption_synthesizes_and_warns() {
        let mut opts = options();
        opts.auto_label_caption = true;
        let out = build_str("| a |\n|---|\n\nx\n\n| b |\n|---|\n", &opts);
        assert!(!out.diagnostics.has_errors());
        let labels: Vec<_> = out.doclets.iter().filter_map(|d| d.label.clone()).collect();
        assert_eq!(labels, vec!["tbl-1", "tbl-2"]);
        assert_eq!(out.doclets[0].caption.as_deref(), Some("tbl-1"));
        assert_eq!(out.diagnostics.warnings.len(), 4);
    }

    #[test]
    fn quote_needs_caption_only() {
        let out = build_str("> first\n> second\n", &options());
        assert_eq!(
            out.diagnostics.errors,
            vec![Diagnostic::MissingCaption {
                kind: "quote".into(),
                line: 1,
            }]
        );
        assert_eq!(out.doclets[0].content, "first\nsecond");
    }

    #[test]
    fn math_label_comes_from_latex_comment() {
        let out = build_str("$$\n%\\label{eq-energy}\n\nE = mc^2\n$$\n", &options());
        let math = &out.doclets[0];
        assert_eq!(math.kind, DocletKind::Math);
        assert_eq!(math.label.as_deref(), Some("eq-energy"));
        assert!(!math.content.contains("label"));
        assert!(math.content.contains("E = mc^2"));
        assert_eq!(out.labels.resolve("eq-energy").unwrap().1, &LabelKind::Equation);
    }

    #[test]
    fn duplicate_labels_are_reported_once() {
        let text = "caption: A\nlabel: dup\n| a |\n\ntext\n\ncaption: B\nlabel: DUP\n| b |\n";
        let out = build_str(text, &options());
        assert_eq!(
            out.diagnostics.errors,
            vec![Diagnostic::DuplicateLabel {
                label: "DUP".into(),
                line: 7,
                first_line: 1,
            }]
        );
    }

    #[test]
    fn headers_get_anchor_labels() {
        let out = build_str("# Related Work\n\ntext\n\n## Setup {#sec-setup}\n\n# Related Work\n", &options());
        let labels: Vec<_> = out.doclets.iter().filter_map(|d| d.label.clone()).collect();
        assert_eq!(labels, vec!["href-related-work", "sec-setup", "href-related-work-2"]);
        assert!(!out.diagnostics.has_errors());
    }

    #[test]
    fn deep_header_is_an_error() {
        let out = build_str("##### Too deep\n", &options());
        assert!(matches!(
            out.diagnostics.errors.as_slice(),
            [Diagnostic::HeaderTooDeep { depth: 5, line: 1, .. }]
        ));
    }

    #[test]
    fn appendix_flag_goes_to_next_content_doclet() {
        let out = build_str("# Body\n\ntext\n\n# Appendix\n\n## Extra\n\nmore\n", &options());
        let flagged: Vec<_> = out.doclets.iter().filter(|d| d.appendix).collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].content, "more");
        assert!(out.doclets.iter().any(|d| d.is_appendix_header() && d.label.is_none()));
    }

    #[test]
    fn dangling_appendix_warns() {
        let out = build_str("text\n\n# Appendix\n", &options());
        assert_eq!(out.diagnostics.warnings, vec![Diagnostic::DanglingAppendix { line: 3 }]);
    }

    #[test]
    fn remote_image_becomes_download_request() {
        let out = build_str("![A cat](https://example.com/img/cat.png)\n", &options());
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        assert_eq!(
            out.resources,
            vec![ResourceRequest {
                source: ResourceSource::Download {
                    url: "https://example.com/img/cat.png".into()
                },
                dest: PathBuf::from("/out/cat.png"),
                line: 1,
            }]
        );
        let image = &out.doclets[0];
        assert_eq!(
            image.kind,
            DocletKind::Image {
                path: "cat.png".into(),
                alt: "A cat".into()
            }
        );
        assert_eq!(image.label.as_deref(), Some("fig-a-cat"));
        assert_eq!(image.caption.as_deref(), Some("A cat"));
    }

    #[test]
    fn local_image_becomes_copy_request() {
        let out = build_str("![](figs/plot.pdf)\n", &options());
        assert_eq!(
            out.resources,
            vec![ResourceRequest {
                source: ResourceSource::Copy {
                    path: PathBuf::from("/docs/figs/plot.pdf")
                },
                dest: PathBuf::from("/out/figs/plot.pdf"),
                line: 1,
            }]
        );
        assert_eq!(out.doclets[0].label.as_deref(), Some("fig-plot"));
    }

    #[test]
    fn image_already_in_output_dir_needs_no_copy() {
        let opts = BuildOptions {
            source_dir: PathBuf::from("/same"),
            output_dir: PathBuf::from("/same"),
            auto_label_caption: false,
        };
        let out = build_str("![x](x.png)\n", &opts);
        assert!(out.resources.is_empty());
    }

    #[test]
    fn svg_image_is_forbidden() {
        let out = build_str("![diagram](arch.SVG)\n", &options());
        assert_eq!(
            out.diagnostics.errors,
            vec![Diagnostic::ForbiddenImageExtension {
                path: "arch.SVG".into(),
                line: 1,
            }]
        );
        assert!(out.resources.is_empty());
    }

    #[test]
    fn naked_url_is_an_error_with_line() {
        let out = build_str("intro\n\nsee https://example.com/page.\n\n[ok](https://a.org) <https://b.org>\n", &options());
        assert_eq!(
            out.diagnostics.errors,
            vec![Diagnostic::NakedUrl {
                url: "https://example.com/page".into(),
                line: 3,
            }]
        );
    }

    #[test]
    fn urls_in_comments_and_inline_code_are_ignored() {
        let out = build_str("<!-- https://hidden.org -->\n\nrun `curl https://x.org` now\n", &options());
        assert!(out.diagnostics.errors.is_empty(), "{:?}", out.diagnostics);
    }

    #[test]
    fn bracket_citations() {
        let out = build_str("As shown [smith-2020, p. 4] and [maybe this].\n", &options());
        assert_eq!(
            out.diagnostics.errors,
            vec![Diagnostic::BracketCitation {
                content: "smith-2020, p. 4".into(),
                line: 1,
            }]
        );
        assert_eq!(
            out.diagnostics.warnings,
            vec![Diagnostic::PossibleBracketCitation {
                content: "maybe this".into(),
                line: 1,
            }]
        );
    }

    #[test]
    fn links_footnotes_and_sic_are_not_citations() {
        let out = build_str(
            "A [link](https://a.org), ![img](a.png), word[sic], note[^1], [ref][1], $[0, 1]$ and `[a-b]`.\n",
            &options(),
        );
        assert!(out.diagnostics.errors.is_empty(), "{:?}", out.diagnostics);
        assert!(out.diagnostics.warnings.is_empty(), "{:?}", out.diagnostics);
    }

    #[test]
    fn every_segment_is_visited_once() {
        let text = "# A\n\ntext\n\n- one\n- two\n\n<!-- c -->\n\n```\nraw\n```\n";
        let out = build_str(text, &options());
        let kinds: Vec<_> = out.doclets.iter().map(|d| d.kind.name()).collect();
        assert_eq!(kinds, vec!["header", "plain", "list", "comment", "literal"]);
    }
}
