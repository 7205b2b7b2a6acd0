//! Post-processing: deterministic cleanup of the assembled LaTeX document.
//!
//! Rendering joins doclets and template fragments with generous newlines and
//! leaves the odd run of spaces where an empty token was substituted. None of
//! that changes the typeset output, but it makes the `.tex` hard to read and
//! diff. The rules here are cheap, pure `&str → String` passes, each testable
//! on its own.
//!
//! ## Verbatim regions
//!
//! `Verbatim`, `verbatim` and `lstlisting` environments and `\lstinline`
//! spans are typeset exactly as written, so the whitespace rules skip them.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to a filled template.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Trim trailing whitespace per line
/// 3. Collapse runs of blank lines to one, outside verbatim regions
/// 4. Collapse repeated inner spaces, outside verbatim regions
/// 5. Ensure the file ends with exactly one newline
pub fn clean_latex(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = trim_trailing_whitespace(&s);
    let s = outside_verbatim(&s, |chunk| collapse_spaces(&collapse_blank_lines(chunk)));
    ensure_final_newline(&s)
}

// ── Verbatim regions ─────────────────────────────────────────────────────

static RE_VERBATIM: Lazy<Regex> = Lazy::new(|| {
    let environments = ["Verbatim", "verbatim", "lstlisting"]
        .iter()
        .map(|env| format!(r"\\begin\{{{env}\}}(?s:.*?)\\end\{{{env}\}}"));
    let inline = ['|', '!', '+', '@', '=', '/', ';']
        .iter()
        .map(|d| {
            let d = regex::escape(&d.to_string());
            format!(r"\\lstinline{d}[^\n]*?{d}")
        });
    Regex::new(&environments.chain(inline).collect::<Vec<_>>().join("|")).unwrap()
});

/// Apply `rule` to every stretch of `input` outside verbatim regions.
fn outside_verbatim(input: &str, rule: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for m in RE_VERBATIM.find_iter(input) {
        out.push_str(&rule(&input[last..m.start()]));
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&rule(&input[last..]));
    out
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Trim trailing whitespace per line ────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 3: Collapse blank lines ─────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 4: Collapse repeated spaces ─────────────────────────────────────

/// Runs of spaces after a non-space character; leading indentation is kept.
static RE_INNER_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^ \n]) {2,}").unwrap());

fn collapse_spaces(input: &str) -> String {
    RE_INNER_SPACES.replace_all(input, "$1 ").to_string()
}

// ── Rule 5: Ensure file ends with single newline ─────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_crlf_and_trailing_whitespace() {
        assert_eq!(clean_latex("a  \r\nb\t\r\n"), "a\nb\n");
    }

    #[test]
    fn collapses_blank_lines() {
        assert_eq!(clean_latex("a\n\n\n\n\nb"), "a\n\nb\n");
        assert_eq!(clean_latex("a\n\nb"), "a\n\nb\n");
    }

    #[test]
    fn collapses_inner_spaces_but_keeps_indentation() {
        assert_eq!(clean_latex("    \\item a   b"), "    \\item a b\n");
    }

    #[test]
    fn verbatim_regions_are_untouched() {
        let input = "x  y\n\\begin{lstlisting}\na    =   1\n\n\n\nb\n\\end{lstlisting}\nz   w \\lstinline|p    q|";
        assert_eq!(
            clean_latex(input),
            "x y\n\\begin{lstlisting}\na    =   1\n\n\n\nb\n\\end{lstlisting}\nz w \\lstinline|p    q|\n"
        );
    }

    #[test]
    fn verbatim_environment_variants() {
        let input = "\\begin{Verbatim}[breaklines]\nk  v\n\\end{Verbatim}";
        assert_eq!(clean_latex(input), format!("{input}\n"));
    }

    #[test]
    fn empty_input_becomes_single_newline() {
        assert_eq!(clean_latex(""), "\n");
        assert_eq!(clean_latex("\n\n\n"), "\n");
    }
}
