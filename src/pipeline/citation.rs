//! Citation resolution: `<label>`, `<label, pages>`, `<label, chapter, pages>`.
//!
//! Every candidate token is parsed with one fixed precedence, full → page →
//! bare, and looked up in the [`LabelRegistry`]:
//!
//! | Target | Output |
//! |--------|--------|
//! | equation label | `\eqref{label}` |
//! | other in-document label | `\ref{label}` |
//! | bibliography entry | `\autocite[..]{label}` or `\cite[..]{label}` (ieee) |
//!
//! Replacements are collected as spans over the untouched text and applied
//! back-to-front by [`crate::pipeline::splice`].

use crate::config::Template;
use crate::error::{Diagnostic, Diagnostics, Md2LatexError};
use crate::pipeline::labels::{LabelKind, LabelRegistry};
use crate::pipeline::splice::{self, Splice};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::fmt;

/// A parsed citation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub reference: String,
    pub chapter: Option<String>,
    /// One-letter `s` (section) or `p` (page) marker, lowercased.
    pub marker: Option<char>,
    /// Page number, page range or timestamp.
    pub pages: Option<String>,
}

const REF: &str = r"[A-Za-z0-9\-_.]+";
const PAGES: &str = r"[-:\d]+";

static RE_CANDIDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"<{REF}(?:,[ \t]*(?:[A-Za-z0-9\-_. ]+?,[ \t]*)?[sSpP]?{PAGES})?>"
    ))
    .unwrap()
});

static RE_FULL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^<(?P<ref>{REF}),[ \t]*(?P<chapter>[A-Za-z0-9\-_. ]+?),[ \t]*(?P<marker>[sSpP])?(?P<pages>{PAGES})>$"
    ))
    .unwrap()
});

static RE_PAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^<(?P<ref>{REF}),[ \t]*(?P<marker>[sSpP])?(?P<pages>{PAGES})>$"
    ))
    .unwrap()
});

static RE_BARE: Lazy<Regex> = Lazy::new(|| Regex::new(&format!(r"^<(?P<ref>{REF})>$")).unwrap());

impl Citation {
    /// Parse one `<...>` token, trying full, page and bare forms in order.
    pub fn parse(token: &str) -> Option<Citation> {
        let from = |caps: Captures<'_>| Citation {
            reference: caps["ref"].to_string(),
            chapter: caps.name("chapter").map(|m| m.as_str().trim().to_string()),
            marker: caps
                .name("marker")
                .and_then(|m| m.as_str().chars().next())
                .map(|c| c.to_ascii_lowercase()),
            pages: caps.name("pages").map(|m| m.as_str().to_string()),
        };
        [&*RE_FULL, &*RE_PAGE, &*RE_BARE]
            .into_iter()
            .find_map(|re| re.captures(token))
            .map(from)
    }

    fn has_qualifier(&self) -> bool {
        self.chapter.is_some() || self.pages.is_some()
    }

    /// Optional-argument text for a bibliography citation.
    fn qualifier(&self, template: Template) -> Option<String> {
        let pages = self.pages.as_deref().map(|p| format_pages(self.marker, p, template));
        match (&self.chapter, pages) {
            (Some(chapter), Some(pages)) => Some(format!("{chapter}, {pages}")),
            (Some(chapter), None) => Some(chapter.clone()),
            (None, pages) => pages,
        }
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.reference)?;
        if let Some(chapter) = &self.chapter {
            write!(f, ", {chapter}")?;
        }
        if let Some(pages) = &self.pages {
            f.write_str(", ")?;
            if let Some(marker) = self.marker {
                write!(f, "{marker}")?;
            }
            f.write_str(pages)?;
        }
        f.write_str(">")
    }
}

/// Page text for the optional argument.
///
/// Timestamps (`18:00`, `11:18-11:35`) are kept as written. An `s` marker
/// names a section. Templates with the `p.`/`pp.` convention prefix page
/// ranges with `pp.` and single pages with `p.`; the others leave numbers
/// bare for biblatex to format.
fn format_pages(marker: Option<char>, pages: &str, template: Template) -> String {
    if pages.contains(':') {
        return pages.to_string();
    }
    if marker == Some('s') {
        return format!("sec. {pages}");
    }
    if template.uses_page_prefix() {
        if pages.contains('-') {
            format!("pp. {pages}")
        } else {
            format!("p. {pages}")
        }
    } else {
        pages.to_string()
    }
}

/// LaTeX for one resolved citation.
fn render(citation: &Citation, canonical: &str, kind: &LabelKind, template: Template) -> String {
    match kind {
        LabelKind::Equation => format!("\\eqref{{{canonical}}}"),
        LabelKind::Bibliography(_) => match citation.qualifier(template) {
            Some(q) => format!("\\{}[{}]{{{}}}", template.cite_command(), q, canonical),
            None => format!("\\{}{{{}}}", template.cite_command(), canonical),
        },
        _ => format!("\\ref{{{canonical}}}"),
    }
}

/// Collect the replacement spans for every citation in `text`.
///
/// Unresolved references are reported as errors and replaced by nothing.
/// `line` is the source line `text` starts on.
pub fn citation_splices(
    text: &str,
    registry: &LabelRegistry,
    template: Template,
    line: usize,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<Splice>, Md2LatexError> {
    let mut splices = Vec::new();
    for m in RE_CANDIDATE.find_iter(text) {
        let token_line = line + text[..m.start()].matches('\n').count();
        let citation = Citation::parse(m.as_str()).ok_or_else(|| Md2LatexError::UnparseableCitation {
            token: m.as_str().to_string(),
            line: token_line,
        })?;

        let replacement = match registry.resolve(&citation.reference) {
            None => {
                diagnostics.error(Diagnostic::UnresolvedCitation {
                    reference: citation.reference.clone(),
                    line: token_line,
                });
                String::new()
            }
            Some((canonical, kind)) => {
                if kind.is_in_document() && citation.has_qualifier() {
                    diagnostics.warn(Diagnostic::QualifiedCrossReference {
                        reference: citation.reference.clone(),
                        line: token_line,
                    });
                }
                render(&citation, canonical, kind, template)
            }
        };
        splices.push(Splice::new(m.range(), replacement));
    }
    Ok(splices)
}

/// Rewrite every citation in `text`.
pub fn resolve(
    text: &str,
    registry: &LabelRegistry,
    template: Template,
    line: usize,
    diagnostics: &mut Diagnostics,
) -> Result<String, Md2LatexError> {
    let splices = citation_splices(text, registry, template, line, diagnostics)?;
    Ok(splice::apply(text, splices))
}
