//! Markdown lists → nested `itemize` / `enumerate`.
//!
//! pulldown-cmark gives the list structure (nesting, ordered or not) with
//! source offsets. Item text is taken from the raw source slices rather than
//! from the parser's inline events, so it goes through the same inline
//! renderer as every other piece of prose.
//!
//! Inline code and `$...$` math are parked as islands *before* the Markdown
//! parser sees the text; otherwise `$a*b*c$` would be parsed as emphasis.

use crate::error::{Diagnostics, Md2LatexError};
use crate::pipeline::inline::{self, InlineContext, Islands};
use once_cell::sync::Lazy;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use regex::Regex;
use std::ops::Range;

static RE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[ \t]*(?:\d+[.)]|[-*+])[ \t]*").unwrap());

enum Frame {
    List { ordered: bool },
    Item { range: Range<usize>, emitted: bool },
}

/// Render a raw Markdown list block.
///
/// `line` is the source line the block starts on.
pub fn render_list(
    markdown: &str,
    ctx: &InlineContext<'_>,
    line: usize,
    diagnostics: &mut Diagnostics,
) -> Result<String, Md2LatexError> {
    let mut islands = Islands::new();
    let protected = protect(markdown, &mut islands);

    let mut out = String::new();
    let mut stack: Vec<Frame> = Vec::new();

    for (event, range) in Parser::new_ext(&protected, Options::empty()).into_offset_iter() {
        match event {
            Event::Start(Tag::List(first)) => {
                emit_pending_item(&protected, &mut stack, range.start, &mut islands, ctx, line, diagnostics, &mut out)?;
                let ordered = first.is_some();
                indent(&mut out, list_depth(&stack));
                out.push_str(if ordered { "\\begin{enumerate}\n" } else { "\\begin{itemize}\n" });
                stack.push(Frame::List { ordered });
            }
            Event::End(TagEnd::List(_)) => {
                if let Some(Frame::List { ordered }) = stack.pop() {
                    indent(&mut out, list_depth(&stack));
                    out.push_str(if ordered { "\\end{enumerate}\n" } else { "\\end{itemize}\n" });
                }
            }
            Event::Start(Tag::Item) => stack.push(Frame::Item {
                range,
                emitted: false,
            }),
            Event::End(TagEnd::Item) => {
                emit_pending_item(&protected, &mut stack, usize::MAX, &mut islands, ctx, line, diagnostics, &mut out)?;
                stack.pop();
            }
            _ => {}
        }
    }

    if !out.contains("\\item") {
        tracing::debug!("list block at line {} parsed without items, rendering as prose", line);
        let prose = inline::render_inline_with(&protected, &mut islands, ctx, line, diagnostics)?;
        return Ok(islands.restore(&prose));
    }
    Ok(islands.restore(out.trim_end()))
}

fn protect(markdown: &str, islands: &mut Islands) -> String {
    let code_safe = inline::stash_inline_code(markdown, islands);
    inline::stash_math(&code_safe, islands)
}

fn list_depth(stack: &[Frame]) -> usize {
    stack.iter().filter(|f| matches!(f, Frame::List { .. })).count()
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

/// Write `\item <text>` for the innermost item if it has not been written
/// yet. The item's own text ends at `stop` (a nested list start) or at the
/// item end.
#[allow(clippy::too_many_arguments)]
fn emit_pending_item(
    source: &str,
    stack: &mut [Frame],
    stop: usize,
    islands: &mut Islands,
    ctx: &InlineContext<'_>,
    line: usize,
    diagnostics: &mut Diagnostics,
    out: &mut String,
) -> Result<(), Md2LatexError> {
    let depth = list_depth(stack);
    let Some(Frame::Item { range, emitted }) = stack.last_mut() else {
        return Ok(());
    };
    if *emitted {
        return Ok(());
    }
    *emitted = true;

    let end = stop.min(range.end).min(source.len());
    let raw = &source[range.start..end];
    let text = RE_MARKER.replace(raw, "");
    let text = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let item_line = line + source[..range.start].matches('\n').count();
    let rendered = inline::render_inline_with(&text, islands, ctx, item_line, diagnostics)?;

    indent(out, depth);
    out.push_str("\\item ");
    out.push_str(&rendered);
    out.push('\n');
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Template;
    use crate::pipeline::labels::{LabelKind, LabelRegistry};

    fn render(markdown: &str) -> String {
        let mut reg = LabelRegistry::new();
        reg.register("knuth", LabelKind::Bibliography("book".into()), 1).unwrap();
        let ctx = InlineContext {
            registry: &reg,
            template: Template::Default,
        };
        let mut diags = Diagnostics::new();
        let out = render_list(markdown, &ctx, 1, &mut diags).unwrap();
        assert!(!diags.has_errors(), "{:?}", diags);
        out
    }

    #[test]
    fn flat_bullets() {
        assert_eq!(
            render("- one\n- two & three\n"),
            "\\begin{itemize}\n  \\item one\n  \\item two \\& three\n\\end{itemize}"
        );
    }

    #[test]
    fn ordered_list() {
        assert_eq!(
            render("1. first\n2. second\n"),
            "\\begin{enumerate}\n  \\item first\n  \\item second\n\\end{enumerate}"
        );
    }

    #[test]
    fn nested_lists() {
        let out = render("- outer\n  1. inner a\n  2. inner b\n- last\n");
        assert_eq!(
            out,
            "\\begin{itemize}\n  \\item outer\n  \\begin{enumerate}\n    \\item inner a\n    \\item inner b\n  \\end{enumerate}\n  \\item last\n\\end{itemize}"
        );
    }

    #[test]
    fn math_in_items_is_not_emphasis() {
        let out = render("- area $a*b*c$ and **bold**\n");
        assert!(out.contains(r"\(a*b*c\)"), "got: {out}");
        assert!(out.contains(r"\textbf{bold}"), "got: {out}");
    }

    #[test]
    fn citations_and_code_in_items() {
        let out = render("- see <knuth, 4>\n- run `a_b`\n");
        assert!(out.contains(r"\item see \autocite[4]{knuth}"), "got: {out}");
        assert!(out.contains(r"\item run \lstinline|a_b|"), "got: {out}");
    }

    #[test]
    fn continuation_lines_stay_in_the_item() {
        let out = render("- first line\n  second line\n- next\n");
        assert!(out.contains("\\item first line\nsecond line\n"), "got: {out}");
    }
}
