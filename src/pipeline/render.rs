//! Rendering: doclets → LaTeX body and appendix streams.
//!
//! Every doclet kind has one rendering rule; prose-bearing kinds go through
//! [`inline::render_inline`] so citations, emphasis and escaping behave the
//! same everywhere. Verbatim kinds (literal, code) are emitted untouched.
//!
//! ## Appendix
//!
//! The doclet builder flags the first content doclet after an "Appendix"
//! header. Rendering walks the doclets with a three-state machine:
//!
//! ```text
//! Body ──(appendix header of the flagged run)──▶ AppendixPending
//!      ──(flagged doclet)──────────────────────▶ Appendix
//! ```
//!
//! The appendix header itself becomes `\appendix`; it and everything after it
//! is written to the appendix stream, which the template places after the
//! bibliography.

use crate::config::Template;
use crate::error::{Diagnostics, Md2LatexError};
use crate::pipeline::doclet::{Doclet, DocletKind};
use crate::pipeline::inline::{self, InlineContext};
use crate::pipeline::labels::LabelRegistry;
use crate::pipeline::list;
use once_cell::sync::Lazy;
use regex::Regex;

/// Output of [`render`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub body: String,
    pub appendix: String,
    /// Raw YAML of the front matter block, if the document has one.
    pub front_matter: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Body,
    AppendixPending,
    Appendix,
}

static RE_ALIGN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\(begin|end)\{align\*?\}").unwrap());

static RE_SEPARATOR_CELL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^:?-+:?$").unwrap());

/// Render every doclet in order.
///
/// Unresolved citations found while rendering are recorded in `diagnostics`;
/// the caller decides whether they are fatal.
pub fn render(
    doclets: &[Doclet],
    registry: &LabelRegistry,
    template: Template,
    diagnostics: &mut Diagnostics,
) -> Result<Rendered, Md2LatexError> {
    let ctx = InlineContext { registry, template };
    let marker = appendix_marker(doclets);

    let mut rendered = Rendered::default();
    let mut body: Vec<String> = Vec::new();
    let mut appendix: Vec<String> = Vec::new();
    let mut stream = Stream::Body;

    for (i, doclet) in doclets.iter().enumerate() {
        if let DocletKind::Yaml = doclet.kind {
            if rendered.front_matter.is_none() {
                rendered.front_matter = Some(doclet.content.clone());
            }
            continue;
        }

        if stream == Stream::Body && marker == Some(i) {
            stream = Stream::AppendixPending;
            appendix.push("\\appendix".to_string());
            continue;
        }
        if stream == Stream::AppendixPending && doclet.appendix {
            stream = Stream::Appendix;
        }

        let latex = render_doclet(doclet, &ctx, diagnostics)?;
        if latex.is_empty() {
            continue;
        }
        match stream {
            Stream::Body => body.push(latex),
            Stream::AppendixPending | Stream::Appendix => appendix.push(latex),
        }
    }

    if stream == Stream::AppendixPending {
        tracing::debug!("appendix header without content; appendix holds headers only");
    }

    rendered.body = body.join("\n\n");
    rendered.appendix = appendix.join("\n\n");
    Ok(rendered)
}

/// Index of the "Appendix" header that opens the appendix: the nearest one
/// before the first flagged doclet.
fn appendix_marker(doclets: &[Doclet]) -> Option<usize> {
    let flagged = doclets.iter().position(|d| d.appendix)?;
    doclets[..flagged].iter().rposition(Doclet::is_appendix_header)
}

fn render_doclet(
    doclet: &Doclet,
    ctx: &InlineContext<'_>,
    diagnostics: &mut Diagnostics,
) -> Result<String, Md2LatexError> {
    let line = doclet.line;
    let latex = match &doclet.kind {
        DocletKind::Yaml => String::new(),
        DocletKind::Comment => comment(&doclet.content),
        DocletKind::Header { depth, title } => {
            let title = inline::render_inline(title, ctx, line, diagnostics)?;
            let mut out = format!("\\{}{{{}}}", sectioning_command(*depth), title);
            if let Some(label) = &doclet.label {
                out.push_str(&format!("\\label{{{label}}}"));
            }
            out
        }
        DocletKind::Image { path, .. } => {
            let caption = caption(doclet, ctx, diagnostics)?;
            figure(path, caption.as_deref(), doclet.label.as_deref(), ctx.template)
        }
        DocletKind::Math => equation(&doclet.content, doclet.label.as_deref()),
        DocletKind::Literal => {
            format!("\\begin{{Verbatim}}[breaklines]\n{}\n\\end{{Verbatim}}", doclet.content)
        }
        DocletKind::Code { language } => {
            let caption = caption(doclet, ctx, diagnostics)?;
            listing(&doclet.content, language, caption.as_deref(), doclet.label.as_deref())
        }
        DocletKind::Table => {
            let caption = caption(doclet, ctx, diagnostics)?;
            let tabular = tabular(&doclet.content, ctx, line, diagnostics)?;
            float("table", &tabular, caption.as_deref(), doclet.label.as_deref())
        }
        DocletKind::Quote => {
            let text = inline::render_inline(&doclet.content, ctx, line, diagnostics)?;
            let caption = caption(doclet, ctx, diagnostics)?;
            quotation(&text, caption.as_deref(), doclet.label.as_deref())
        }
        DocletKind::List => list::render_list(&doclet.content, ctx, line, diagnostics)?,
        DocletKind::Plain => inline::render_inline(&doclet.content, ctx, line, diagnostics)?,
    };
    Ok(latex)
}

fn caption(
    doclet: &Doclet,
    ctx: &InlineContext<'_>,
    diagnostics: &mut Diagnostics,
) -> Result<Option<String>, Md2LatexError> {
    doclet
        .caption
        .as_deref()
        .map(|c| inline::render_inline(c, ctx, doclet.line, diagnostics))
        .transpose()
}

// ── Per-kind rules ───────────────────────────────────────────────────────

fn sectioning_command(depth: usize) -> &'static str {
    match depth {
        1 => "section",
        2 => "subsection",
        3 => "subsubsection",
        _ => "paragraph",
    }
}

fn comment(content: &str) -> String {
    content
        .lines()
        .map(|l| format!("% {}", l.trim()).trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn figure(path: &str, caption: Option<&str>, label: Option<&str>, template: Template) -> String {
    let path = path.replace('\\', "/");
    let graphic = format!("\\includegraphics[width={}]{{{}}}", template.figure_width(), path);
    float("figure", &graphic, caption, label)
}

/// A `[htbp]` float with a centered payload, caption and label.
fn float(env: &str, payload: &str, caption: Option<&str>, label: Option<&str>) -> String {
    let mut out = format!("\\begin{{{env}}}[htbp]\n  \\centering\n");
    if env == "table" {
        push_caption_label(&mut out, caption, label);
    }
    for l in payload.lines() {
        out.push_str("  ");
        out.push_str(l);
        out.push('\n');
    }
    if env != "table" {
        push_caption_label(&mut out, caption, label);
    }
    out.push_str(&format!("\\end{{{env}}}"));
    out
}

fn push_caption_label(out: &mut String, caption: Option<&str>, label: Option<&str>) {
    if let Some(caption) = caption {
        out.push_str(&format!("  \\caption{{{caption}}}\n"));
    }
    if let Some(label) = label {
        out.push_str(&format!("  \\label{{{label}}}\n"));
    }
}

fn equation(content: &str, label: Option<&str>) -> String {
    let math = RE_ALIGN.replace_all(content, "\\${1}{aligned}");
    let mut out = String::from("\\begin{equation}\n");
    for l in math.lines().filter(|l| !l.trim().is_empty()) {
        out.push_str(l);
        out.push('\n');
    }
    if let Some(label) = label {
        out.push_str(&format!("\\label{{{label}}}\n"));
    }
    out.push_str("\\end{equation}");
    out
}

/// `listings` name for a fence language, if `listings` knows it.
fn listings_language(fence: &str) -> Option<&'static str> {
    let lang = match fence.to_ascii_lowercase().as_str() {
        "python" | "py" | "python3" => "Python",
        "c" => "C",
        "cpp" | "c++" | "cxx" => "C++",
        "java" => "Java",
        "bash" | "sh" | "shell" | "zsh" | "console" => "bash",
        "sql" => "SQL",
        "html" => "HTML",
        "xml" => "XML",
        "tex" | "latex" => "[LaTeX]TeX",
        "r" => "R",
        "ruby" | "rb" => "Ruby",
        "perl" => "Perl",
        "matlab" => "Matlab",
        "fortran" => "Fortran",
        "haskell" | "hs" => "Haskell",
        "make" | "makefile" => "make",
        _ => return None,
    };
    Some(lang)
}

fn listing(content: &str, language: &str, caption: Option<&str>, label: Option<&str>) -> String {
    let mut options = Vec::new();
    match listings_language(language) {
        Some(lang) => options.push(format!("language={lang}")),
        None if !language.is_empty() => {
            tracing::debug!("no listings language for '{}', rendering as plain code", language);
        }
        None => {}
    }
    if let Some(caption) = caption {
        options.push(format!("caption={{{caption}}}"));
    }
    if let Some(label) = label {
        options.push(format!("label={{{label}}}"));
    }
    let options = if options.is_empty() {
        String::new()
    } else {
        format!("[{}]", options.join(", "))
    };
    format!("\\begin{{lstlisting}}{options}\n{content}\n\\end{{lstlisting}}")
}

fn quotation(text: &str, caption: Option<&str>, label: Option<&str>) -> String {
    let mut out = String::from("\\begin{quotation}\n");
    out.push_str(text);
    out.push('\n');
    if let Some(caption) = caption {
        out.push_str(&format!("\\par\\hfill --- {caption}\n"));
    }
    if let Some(label) = label {
        out.push_str(&format!("\\label{{{label}}}\n"));
    }
    out.push_str("\\end{quotation}");
    out
}

// ── Tables ───────────────────────────────────────────────────────────────

fn split_row(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('|').unwrap_or(trimmed);

    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                cell.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut cell).trim().to_string()),
            _ => cell.push(c),
        }
    }
    cells.push(cell.trim().to_string());
    cells
}

fn is_separator(cells: &[String]) -> bool {
    !cells.is_empty() && cells.iter().all(|c| RE_SEPARATOR_CELL.is_match(c))
}

fn alignment(cell: &str) -> char {
    match (cell.starts_with(':'), cell.ends_with(':')) {
        (true, true) => 'c',
        (false, true) => 'r',
        _ => 'l',
    }
}

/// Pipe table → `tabular`. The row before the separator is the header.
fn tabular(
    content: &str,
    ctx: &InlineContext<'_>,
    first_line: usize,
    diagnostics: &mut Diagnostics,
) -> Result<String, Md2LatexError> {
    let rows: Vec<(usize, Vec<String>)> = content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| (first_line + i, split_row(l)))
        .collect();

    let separator = rows.iter().position(|(_, cells)| is_separator(cells));
    let columns = rows
        .iter()
        .filter(|(_, cells)| !is_separator(cells))
        .map(|(_, cells)| cells.len())
        .max()
        .unwrap_or(1);

    let mut spec: Vec<char> = separator
        .map(|i| rows[i].1.iter().map(|c| alignment(c)).collect())
        .unwrap_or_default();
    spec.resize(columns, 'l');
    let spec: String = spec.iter().map(|c| format!("|{c}")).collect::<String>() + "|";

    let mut out = format!("\\begin{{tabular}}{{{spec}}}\n  \\hline\n");
    for (i, (line, cells)) in rows.iter().enumerate() {
        if Some(i) == separator {
            continue;
        }
        let header = separator.is_some_and(|s| i < s);
        let mut rendered = Vec::with_capacity(columns);
        for col in 0..columns {
            let cell = cells.get(col).map(String::as_str).unwrap_or("");
            let latex = inline::render_inline(cell, ctx, *line, diagnostics)?;
            rendered.push(if header && !latex.is_empty() {
                format!("\\textbf{{{latex}}}")
            } else {
                latex
            });
        }
        out.push_str(&format!("  {} \\\\\n", rendered.join(" & ")));
        if separator == Some(i + 1) {
            out.push_str("  \\hline\n");
        }
    }
    out.push_str("  \\hline\n\\end{tabular}");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::labels::LabelKind;

    fn doclet(kind: DocletKind, content: &str, line: usize) -> Doclet {
        Doclet {
            kind,
            label: None,
            caption: None,
            content: content.to_string(),
            appendix: false,
            line,
        }
    }

    fn header(depth: usize, title: &str, label: Option<&str>) -> Doclet {
        let mut d = doclet(
            DocletKind::Header {
                depth,
                title: title.to_string(),
            },
            title,
            1,
        );
        d.label = label.map(str::to_string);
        d
    }

    fn registry() -> LabelRegistry {
        let mut reg = LabelRegistry::new();
        reg.register("knuth", LabelKind::Bibliography("book".into()), 1).unwrap();
        reg.register("tbl-results", LabelKind::Table, 2).unwrap();
        reg
    }

    fn run(doclets: &[Doclet], template: Template) -> Rendered {
        let mut diags = Diagnostics::new();
        let out = render(doclets, &registry(), template, &mut diags).unwrap();
        assert!(!diags.has_errors(), "{:?}", diags);
        out
    }

    #[test]
    fn header_depths_map_to_sectioning() {
        let out = run(
            &[
                header(1, "Intro", Some("href-intro")),
                header(2, "Setup", None),
                header(3, "Deep", None),
                header(4, "Deeper", None),
            ],
            Template::Default,
        );
        assert_eq!(
            out.body,
            "\\section{Intro}\\label{href-intro}\n\n\\subsection{Setup}\n\n\\subsubsection{Deep}\n\n\\paragraph{Deeper}"
        );
    }

    #[test]
    fn appendix_splits_the_streams() {
        let mut flagged = doclet(DocletKind::Plain, "extra data", 9);
        flagged.appendix = true;
        let doclets = vec![
            header(1, "Body", Some("href-body")),
            doclet(DocletKind::Plain, "main text", 2),
            header(1, "Appendix", None),
            header(2, "Tables", Some("href-tables")),
            flagged,
            doclet(DocletKind::Plain, "more", 10),
        ];
        let out = run(&doclets, Template::Default);
        assert_eq!(out.body, "\\section{Body}\\label{href-body}\n\nmain text");
        assert_eq!(
            out.appendix,
            "\\appendix\n\n\\subsection{Tables}\\label{href-tables}\n\nextra data\n\nmore"
        );
    }

    #[test]
    fn appendix_header_without_content_stays_in_body() {
        let out = run(&[header(1, "Appendix", None)], Template::Default);
        assert_eq!(out.body, "\\section{Appendix}");
        assert!(out.appendix.is_empty());
    }

    #[test]
    fn figure_width_follows_template() {
        let mut d = doclet(
            DocletKind::Image {
                path: "img/plot.png".into(),
                alt: "Plot".into(),
            },
            "",
            3,
        );
        d.caption = Some("A plot".into());
        d.label = Some("fig-plot".into());

        let default = run(std::slice::from_ref(&d), Template::Default).body;
        assert!(default.contains("\\includegraphics[width=0.66\\textwidth]{img/plot.png}"));
        assert!(default.contains("\\caption{A plot}\n  \\label{fig-plot}"));

        let ieee = run(&[d], Template::Ieee).body;
        assert!(ieee.contains("\\includegraphics[width=\\linewidth]{img/plot.png}"));
    }

    #[test]
    fn math_normalises_align_and_drops_blank_lines() {
        let mut d = doclet(DocletKind::Math, "\\begin{align}\na &= b \\\\\n\nc &= d\n\\end{align}", 4);
        d.label = Some("eq-ab".into());
        assert_eq!(
            run(&[d], Template::Default).body,
            "\\begin{equation}\n\\begin{aligned}\na &= b \\\\\nc &= d\n\\end{aligned}\n\\label{eq-ab}\n\\end{equation}"
        );
    }

    #[test]
    fn code_and_literal_are_untouched() {
        let mut code = doclet(
            DocletKind::Code {
                language: "py".into(),
            },
            "x = a_b & c  # 100%",
            5,
        );
        code.caption = Some("Snippet & more".into());
        code.label = Some("code-1".into());
        let literal = doclet(DocletKind::Literal, "raw $ & _ text", 8);

        let out = run(&[code, literal], Template::Default).body;
        assert!(out.contains(
            "\\begin{lstlisting}[language=Python, caption={Snippet \\& more}, label={code-1}]\nx = a_b & c  # 100%\n\\end{lstlisting}"
        ));
        assert!(out.contains("\\begin{Verbatim}[breaklines]\nraw $ & _ text\n\\end{Verbatim}"));
    }

    #[test]
    fn unknown_code_language_has_no_language_option() {
        let d = doclet(
            DocletKind::Code {
                language: "rust".into(),
            },
            "fn main() {}",
            1,
        );
        assert_eq!(
            run(&[d], Template::Default).body,
            "\\begin{lstlisting}\nfn main() {}\n\\end{lstlisting}"
        );
    }

    #[test]
    fn table_alignment_and_cells() {
        let mut d = doclet(
            DocletKind::Table,
            "| Name | Score |\n|:----:|------:|\n| a_b | 10% |\n| <knuth> |",
            6,
        );
        d.caption = Some("Results".into());
        d.label = Some("tbl-results".into());
        let out = run(&[d], Template::Default).body;
        assert!(out.starts_with("\\begin{table}[htbp]\n  \\centering\n  \\caption{Results}\n  \\label{tbl-results}\n"));
        assert!(out.contains("\\begin{tabular}{|c|r|}"), "got: {out}");
        assert!(out.contains("\\textbf{Name} & \\textbf{Score} \\\\"), "got: {out}");
        assert!(out.contains("a\\_b & 10\\% \\\\"), "got: {out}");
        assert!(out.contains("\\autocite{knuth} &  \\\\"), "got: {out}");
        assert!(out.ends_with("\\end{tabular}\n\\end{table}"));
    }

    #[test]
    fn quote_gets_attribution() {
        let mut d = doclet(DocletKind::Quote, "To be & not\nto be", 7);
        d.caption = Some("Hamlet".into());
        assert_eq!(
            run(&[d], Template::Default).body,
            "\\begin{quotation}\nTo be \\& not\nto be\n\\par\\hfill --- Hamlet\n\\end{quotation}"
        );
    }

    #[test]
    fn yaml_becomes_front_matter_and_comments_stay_comments() {
        let doclets = vec![
            doclet(DocletKind::Yaml, "title: Hi", 1),
            doclet(DocletKind::Comment, "note to self\nsecond", 4),
            doclet(DocletKind::Plain, "See <tbl-results>.", 6),
        ];
        let out = run(&doclets, Template::Default);
        assert_eq!(out.front_matter.as_deref(), Some("title: Hi"));
        assert_eq!(out.body, "% note to self\n% second\n\nSee \\ref{tbl-results}.");
    }

    #[test]
    fn unresolved_citation_is_reported() {
        let mut diags = Diagnostics::new();
        render(
            &[doclet(DocletKind::Plain, "see <ghost>", 3)],
            &registry(),
            Template::Default,
            &mut diags,
        )
        .unwrap();
        assert!(diags.has_errors());
    }
}
