//! Inline Markdown → LaTeX for prose.
//!
//! ## Islands
//!
//! Inline code, inline math, links and resolved citations must survive the
//! later rewriting passes untouched: `$a_b$` must not become `$a\_b$`, and
//! `*` inside code must not turn into `\emph`. Each of them is rendered first
//! and replaced by a placeholder `U+E000 n U+E001` (private-use characters
//! that never occur in real text). Emphasis and escaping then run on the
//! remaining prose, and the placeholders are swapped back at the end.
//!
//! ## Order
//!
//! 1. horizontal rules, inline code, links, inline math → islands
//! 2. bold, italic and double-quote substitution
//! 3. citations → islands
//! 4. escaping of `& % # _ $ ~ ^`
//! 5. island restoration

use crate::config::Template;
use crate::error::{Diagnostics, Md2LatexError};
use crate::pipeline::citation;
use crate::pipeline::labels::LabelRegistry;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const ISLAND_OPEN: char = '\u{E000}';
const ISLAND_CLOSE: char = '\u{E001}';

/// Rendered fragments parked behind placeholders.
#[derive(Debug, Default)]
pub struct Islands {
    items: Vec<String>,
}

impl Islands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `latex` and return its placeholder.
    pub fn stash(&mut self, latex: impl Into<String>) -> String {
        self.items.push(latex.into());
        format!("{ISLAND_OPEN}{}{ISLAND_CLOSE}", self.items.len() - 1)
    }

    /// Replace every placeholder with its fragment. Islands may contain
    /// placeholders themselves (a link label holding inline code).
    pub fn restore(&self, text: &str) -> String {
        let mut out = text.to_string();
        for _ in 0..4 {
            if !out.contains(ISLAND_OPEN) {
                break;
            }
            out = RE_PLACEHOLDER
                .replace_all(&out, |caps: &Captures<'_>| {
                    caps[1]
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| self.items.get(i))
                        .cloned()
                        .unwrap_or_default()
                })
                .into_owned();
        }
        out
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What inline rendering needs from the document.
#[derive(Debug, Clone, Copy)]
pub struct InlineContext<'a> {
    pub registry: &'a LabelRegistry,
    pub template: Template,
}

// ── Patterns ─────────────────────────────────────────────────────────────

static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new("\u{E000}(\\d+)\u{E001}").unwrap());

static RE_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:-{3,}|\*{3,}|_{3,})[ \t]*$").unwrap());

static RE_INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+)`").unwrap());

static RE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]\n]*)\]\(([^)\s]+)(?:[ \t]+\x22[^\x22\n]*\x22)?\)").unwrap());

static RE_WRAPPED_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[<{\[][ \t]*(https?://[^\s<>{}\[\]]+)[ \t]*[>}\]]").unwrap());

static RE_BOLD_ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*{3}([^*\n]+?)\*{3}").unwrap());
static RE_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*{2}([^*\n]+?)\*{2}").unwrap());
static RE_ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*\n]+?)\*").unwrap());
static RE_DOUBLE_QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"\n]*)""#).unwrap());

// ── Entry points ─────────────────────────────────────────────────────────

/// Render a prose fragment to LaTeX.
///
/// `line` is the source line `text` starts on, for citation diagnostics.
pub fn render_inline(
    text: &str,
    ctx: &InlineContext<'_>,
    line: usize,
    diagnostics: &mut Diagnostics,
) -> Result<String, Md2LatexError> {
    let mut islands = Islands::new();
    let rendered = render_inline_with(text, &mut islands, ctx, line, diagnostics)?;
    Ok(islands.restore(&rendered))
}

/// Like [`render_inline`] but leaves placeholders in place, sharing
/// `islands` with a caller that stashed fragments earlier.
pub fn render_inline_with(
    text: &str,
    islands: &mut Islands,
    ctx: &InlineContext<'_>,
    line: usize,
    diagnostics: &mut Diagnostics,
) -> Result<String, Md2LatexError> {
    let s = stash_rules(text, islands);
    let s = stash_inline_code(&s, islands);
    let s = stash_links(&s, islands);
    let s = stash_math(&s, islands);
    let s = emphasis(&s);
    let s = stash_citations(&s, islands, ctx, line, diagnostics)?;
    Ok(escape_latex(&s))
}

// ── Islands ──────────────────────────────────────────────────────────────

fn stash_rules(text: &str, islands: &mut Islands) -> String {
    RE_RULE
        .replace_all(text, |_: &Captures<'_>| {
            islands.stash("\\noindent\\rule{\\linewidth}{0.4pt}")
        })
        .into_owned()
}

/// Park inline code spans as `\\lstinline`.
pub fn stash_inline_code(text: &str, islands: &mut Islands) -> String {
    RE_INLINE_CODE
        .replace_all(text, |caps: &Captures<'_>| islands.stash(inline_code(&caps[1])))
        .into_owned()
}

/// `\lstinline` with a delimiter absent from the code, or `\texttt` when
/// every candidate delimiter occurs in it.
fn inline_code(code: &str) -> String {
    match ['|', '!', '+', '@', '=', '/', ';'].into_iter().find(|d| !code.contains(*d)) {
        Some(delim) => format!("\\lstinline{delim}{code}{delim}"),
        None => format!("\\texttt{{{}}}", escape_latex(code)),
    }
}

fn stash_links(text: &str, islands: &mut Islands) -> String {
    let s = RE_LINK
        .replace_all(text, |caps: &Captures<'_>| {
            let label = escape_latex(&emphasis(caps[1].trim()));
            let target = &caps[2];
            let latex = if let Some(anchor) = target.strip_prefix('#') {
                format!("\\hyperref[{anchor}]{{{label}}}")
            } else if label.is_empty() {
                format!("\\url{{{}}}", escape_url(target))
            } else {
                format!("\\href{{{}}}{{{}}}", escape_url(target), label)
            };
            islands.stash(latex)
        })
        .into_owned();
    RE_WRAPPED_URL
        .replace_all(&s, |caps: &Captures<'_>| {
            islands.stash(format!("\\url{{{}}}", escape_url(&caps[1])))
        })
        .into_owned()
}

fn escape_url(url: &str) -> String {
    url.replace('%', "\\%").replace('#', "\\#")
}

/// Park `$...$` spans as `\(...\)`.
///
/// A `$` directly followed by an amount and whitespace (`$5 `, `$1,200.50 `)
/// is currency, not math. Escaped `\$` and display `$$` are left alone.
pub fn stash_math(text: &str, islands: &mut Islands) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' || (i > 0 && bytes[i - 1] == b'\\') {
            i += 1;
            continue;
        }
        if bytes.get(i + 1) == Some(&b'$') {
            i += 2;
            continue;
        }
        if is_currency(&text[i + 1..]) {
            i += 1;
            continue;
        }
        let Some(close) = closing_dollar(text, i + 1) else {
            i += 1;
            continue;
        };
        let content = &text[i + 1..close];
        if content.trim().is_empty() {
            i = close + 1;
            continue;
        }
        out.push_str(&text[copied..i]);
        out.push_str(&islands.stash(format!("\\({}\\)", content)));
        i = close + 1;
        copied = i;
    }
    out.push_str(&text[copied..]);
    out
}

fn is_currency(after: &str) -> bool {
    let mut chars = after.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }
    for c in chars {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            continue;
        }
        return c.is_whitespace();
    }
    true
}

fn closing_dollar(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut j = from;
    while j < bytes.len() {
        match bytes[j] {
            b'\n' => return None,
            b'$' if bytes[j - 1] != b'\\' => return Some(j),
            _ => {}
        }
        j += 1;
    }
    None
}

fn stash_citations(
    text: &str,
    islands: &mut Islands,
    ctx: &InlineContext<'_>,
    line: usize,
    diagnostics: &mut Diagnostics,
) -> Result<String, Md2LatexError> {
    let splices = citation::citation_splices(text, ctx.registry, ctx.template, line, diagnostics)?
        .into_iter()
        .map(|mut s| {
            if !s.replacement.is_empty() {
                s.replacement = islands.stash(s.replacement);
            }
            s
        })
        .collect();
    Ok(crate::pipeline::splice::apply(text, splices))
}

// ── Prose rewriting ──────────────────────────────────────────────────────

/// Bold, italic and straight double quotes.
pub fn emphasis(text: &str) -> String {
    let s = RE_DOUBLE_QUOTE.replace_all(text, "``$1''");
    let s = RE_BOLD_ITALIC.replace_all(&s, "\\textbf{\\emph{$1}}");
    let s = RE_BOLD.replace_all(&s, "\\textbf{$1}");
    RE_ITALIC.replace_all(&s, "\\emph{$1}").into_owned()
}

/// Escape LaTeX special characters that are not escaped yet.
///
/// Backslashes and braces are kept so authors can write raw LaTeX inline.
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut prev = '\0';
    for c in text.chars() {
        let escaped = prev == '\\';
        match c {
            '&' | '%' | '#' | '_' | '$' if !escaped => {
                out.push('\\');
                out.push(c);
            }
            '~' if !escaped => out.push_str("\\textasciitilde{}"),
            '^' if !escaped => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
        prev = if escaped && c == '\\' { '\0' } else { c };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::labels::LabelKind;

    fn registry() -> LabelRegistry {
        let mut reg = LabelRegistry::new();
        reg.register("knuth_84", LabelKind::Bibliography("book".into()), 1).unwrap();
        reg.register("fig-cat", LabelKind::Figure, 2).unwrap();
        reg
    }

    fn render(text: &str) -> String {
        let reg = registry();
        let ctx = InlineContext {
            registry: &reg,
            template: Template::Default,
        };
        let mut diags = Diagnostics::new();
        let out = render_inline(text, &ctx, 1, &mut diags).unwrap();
        assert!(!diags.has_errors(), "{:?}", diags);
        out
    }

    #[test]
    fn emphasis_and_quotes() {
        assert_eq!(
            render(r#"***all*** **bold** *it* "quoted""#),
            r"\textbf{\emph{all}} \textbf{bold} \emph{it} ``quoted''"
        );
    }

    #[test]
    fn specials_are_escaped_once() {
        assert_eq!(render(r"R&D 50% #1 a_b \& ok"), r"R\&D 50\% \#1 a\_b \& ok");
        assert_eq!(render("~ ^"), r"\textasciitilde{} \textasciicircum{}");
    }

    #[test]
    fn inline_math_is_untouched() {
        assert_eq!(render("area $a_b^2 * c$ here"), r"area \(a_b^2 * c\) here");
    }

    #[test]
    fn currency_is_not_math() {
        assert_eq!(render("costs $5 or $1,200.50 total"), r"costs \$5 or \$1,200.50 total");
        assert_eq!(render("costs $5 and $x_1$"), r"costs \$5 and \(x_1\)");
    }

    #[test]
    fn inline_code_uses_lstinline() {
        assert_eq!(render("call `a_b*c`"), r"call \lstinline|a_b*c|");
        assert_eq!(render("pipe `a|b`"), r"pipe \lstinline!a|b!");
    }

    #[test]
    fn links_and_urls() {
        assert_eq!(
            render("see [the *docs*](https://x.org/a_b#s) and <https://y.org/100%>"),
            r"see \href{https://x.org/a_b\#s}{the \emph{docs}} and \url{https://y.org/100\%}"
        );
        assert_eq!(render("jump to [setup](#href-setup)"), r"jump to \hyperref[href-setup]{setup}");
    }

    #[test]
    fn citations_survive_escaping() {
        assert_eq!(
            render("as <knuth_84, 3> shows in <fig-cat>"),
            r"as \autocite[3]{knuth_84} shows in \ref{fig-cat}"
        );
    }

    #[test]
    fn horizontal_rule() {
        assert_eq!(render("a\n\n---\n\nb"), "a\n\n\\noindent\\rule{\\linewidth}{0.4pt}\n\nb");
    }

    #[test]
    fn unresolved_citation_is_reported() {
        let reg = registry();
        let ctx = InlineContext {
            registry: &reg,
            template: Template::Ieee,
        };
        let mut diags = Diagnostics::new();
        let out = render_inline("x\ny <missing>", &ctx, 10, &mut diags).unwrap();
        assert_eq!(out, "x\ny ");
        assert!(matches!(
            diags.errors.as_slice(),
            [crate::error::Diagnostic::UnresolvedCitation { line: 11, .. }]
        ));
    }

    #[test]
    fn islands_restore_nested_placeholders() {
        let mut islands = Islands::new();
        let inner = islands.stash("IN");
        let outer = islands.stash(format!("<{inner}>"));
        assert_eq!(islands.restore(&format!("a {outer} b")), "a <IN> b");
        assert_eq!(islands.len(), 2);
    }
}
