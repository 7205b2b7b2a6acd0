//! BibTeX extraction from arbitrary text.
//!
//! Authors keep their bibliography inside the Markdown document (usually in a
//! fenced block under `# References`) or in side files. This module finds
//! every `@type{key, ...}` entry, removes it from the surrounding text, and
//! returns a clean `.bib` body plus the leftover text.
//!
//! ## Escaping
//!
//! Entries are parsed structurally, field by field. Only the characters
//! *inside* quoted or braced field values are LaTeX-escaped (`& % $ # _`);
//! keys, field names, bare values and `%` comments between fields are copied
//! untouched. Characters that are already escaped are left alone.
//!
//! Verbatim fields (`url`, `doi`, `eprint`, `file`) are never escaped since
//! the bibliography processor reads them literally.
//!
//! ## Nested braces
//!
//! A value fragment containing an unescaped `{` or `}` (for example
//! `journal = "\url{...}"` or `title = {The {IEEE} way}`) is rejected with
//! [`Md2LatexError::BadBibtexBraces`] listing every offending fragment, so
//! all of them can be fixed at the source in one go.

use crate::error::Md2LatexError;
use crate::pipeline::splice::{self, Splice};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::ops::Range;

/// A bibliography label and the entry type it was declared with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BibLabel {
    pub label: String,
    /// Lowercase entry type: `book`, `article`, `misc`...
    pub entry_type: String,
    /// 1-based line of the `@` in the scanned text.
    pub line: usize,
}

/// One parsed entry.
#[derive(Debug, Clone)]
struct BibEntry {
    entry_type: String,
    key: Option<String>,
    line: usize,
    range: Range<usize>,
    /// Entry text with field values escaped.
    text: String,
}

// Entry types that carry no citable key.
const KEYLESS_TYPES: [&str; 3] = ["comment", "string", "preamble"];
// Fields read verbatim by biber/bibtex.
const VERBATIM_FIELDS: [&str; 4] = ["url", "doi", "eprint", "file"];

static RE_ENTRY_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(@([A-Za-z]+)[ \t]*)\{").unwrap());

// Fenced block left empty once its entries are gone.
static RE_EMPTY_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*```[A-Za-z]*[ \t]*\n\s*```[ \t]*(?:\n|\z)").unwrap());

static RE_BIBLIOGRAPHY_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^#+[ \t]+(?:bibliography|references|citations)[ \t]*(?:\n|\z)").unwrap()
});

static RE_ANY_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#+[ \t]+\S").unwrap());

/// Split `text` into `(bibtex_only, everything_else)`.
///
/// Entries are joined with a blank line. In the leftover text each entry's
/// span is replaced by its line breaks, so every other line keeps its number.
pub fn extract(text: &str) -> Result<(String, String), Md2LatexError> {
    let entries = parse_entries(text)?;
    let bib = entries
        .iter()
        .map(|e| e.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let removals = entries
        .iter()
        .map(|e| Splice::new(e.range.clone(), line_breaks(&text[e.range.clone()])))
        .collect();
    Ok((bib, splice::apply(text, removals)))
}

/// Labels declared by the entries in `text`.
///
/// `@comment`, `@string` and `@preamble` are skipped; any other entry without
/// a key is a [`Md2LatexError::MalformedBibtex`].
pub fn extract_labels(text: &str) -> Result<Vec<BibLabel>, Md2LatexError> {
    let mut labels = Vec::new();
    for entry in parse_entries(text)? {
        if KEYLESS_TYPES.contains(&entry.entry_type.as_str()) {
            continue;
        }
        match entry.key {
            Some(label) => labels.push(BibLabel {
                label,
                entry_type: entry.entry_type,
                line: entry.line,
            }),
            None => {
                return Err(Md2LatexError::MalformedBibtex {
                    line: entry.line,
                    detail: format!("@{} entry has no citation key", entry.entry_type),
                })
            }
        }
    }
    Ok(labels)
}

/// Remove what entry extraction leaves behind in a Markdown body: empty code
/// fences, and a bibliography/references/citations heading with nothing but
/// whitespace under it. Removed text leaves its line breaks behind.
pub fn strip_bibliography_section(markdown: &str) -> String {
    let without_fences = RE_EMPTY_FENCE
        .replace_all(markdown, |caps: &regex::Captures<'_>| line_breaks(&caps[0]))
        .into_owned();

    let mut removals = Vec::new();
    for m in RE_BIBLIOGRAPHY_HEADING.find_iter(&without_fences) {
        let section_end = RE_ANY_HEADING
            .find_at(&without_fences, m.end())
            .map_or(without_fences.len(), |h| h.start());
        if without_fences[m.end()..section_end].trim().is_empty() {
            let removed = &without_fences[m.start()..section_end];
            removals.push(Splice::new(m.start()..section_end, line_breaks(removed)));
        }
    }
    splice::apply(&without_fences, removals)
}

/// The `\n`s of `removed`, standing in for it so later lines keep their numbers.
fn line_breaks(removed: &str) -> String {
    "\n".repeat(removed.matches('\n').count())
}

// ── Parser ───────────────────────────────────────────────────────────────

fn parse_entries(text: &str) -> Result<Vec<BibEntry>, Md2LatexError> {
    let mut entries = Vec::new();
    let mut bad_fragments = Vec::new();
    let mut resume = 0;

    for caps in RE_ENTRY_START.captures_iter(text) {
        let (Some(head), Some(kind), Some(whole)) = (caps.get(1), caps.get(2), caps.get(0)) else {
            continue;
        };
        // Skip starts that fall inside an entry already consumed.
        if head.start() < resume {
            continue;
        }
        let line = line_of(text, head.start());
        let entry_type = kind.as_str().to_ascii_lowercase();
        let open = whole.end() - 1;

        let mut parser = EntryParser {
            text,
            pos: open + 1,
            line,
            splices: Vec::new(),
            bad: &mut bad_fragments,
        };
        let (key, end) = if entry_type == "comment" || entry_type == "preamble" {
            (None, parser.skip_balanced(open)?)
        } else {
            parser.parse_body()?
        };

        let base = head.start();
        let shifted = parser
            .splices
            .into_iter()
            .map(|s| Splice::new(s.range.start - base..s.range.end - base, s.replacement))
            .collect();
        entries.push(BibEntry {
            entry_type,
            key,
            line,
            range: base..end,
            text: splice::apply(&text[base..end], shifted),
        });
        resume = end;
    }

    if bad_fragments.is_empty() {
        tracing::debug!("parsed {} bibtex entries", entries.len());
        Ok(entries)
    } else {
        Err(Md2LatexError::BadBibtexBraces {
            fragments: bad_fragments,
        })
    }
}

struct EntryParser<'a, 'b> {
    text: &'a str,
    pos: usize,
    line: usize,
    splices: Vec<Splice>,
    bad: &'b mut Vec<String>,
}

impl EntryParser<'_, '_> {
    fn bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.pos).copied()
    }

    fn malformed(&self, detail: impl Into<String>) -> Md2LatexError {
        Md2LatexError::MalformedBibtex {
            line: self.line,
            detail: detail.into(),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    /// Index one past the brace matching the one at `open`.
    fn skip_balanced(&mut self, open: usize) -> Result<usize, Md2LatexError> {
        let close = matching_brace(self.bytes(), open)
            .ok_or_else(|| self.malformed("unterminated entry"))?;
        self.pos = close + 1;
        Ok(close + 1)
    }

    /// Parse `key, name = value, ... }` and return the key and the end offset.
    fn parse_body(&mut self) -> Result<(Option<String>, usize), Md2LatexError> {
        self.skip_whitespace();
        let key_start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b',' | b'=' | b'}') {
                break;
            }
            self.pos += 1;
        }
        let key = match self.peek() {
            Some(b',') => {
                let key = self.text[key_start..self.pos].trim().to_string();
                self.pos += 1;
                (!key.is_empty()).then_some(key)
            }
            Some(b'}') => {
                let key = self.text[key_start..self.pos].trim().to_string();
                self.pos += 1;
                return Ok(((!key.is_empty()).then_some(key), self.pos));
            }
            Some(_) => {
                // `name = value` right after the brace: no key.
                self.pos = key_start;
                None
            }
            None => return Err(self.malformed("unterminated entry")),
        };

        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(self.malformed("unterminated entry")),
                Some(b',') => self.pos += 1,
                Some(b'%') => self.skip_line(),
                Some(b'}') => {
                    self.pos += 1;
                    return Ok((key, self.pos));
                }
                Some(_) => self.parse_field()?,
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(b) = self.peek() {
            if b == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn parse_field(&mut self) -> Result<(), Md2LatexError> {
        let name_start = self.pos;
        while let Some(b) = self.peek() {
            if !(b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b':' | b'.' | b'+')) {
                break;
            }
            self.pos += 1;
        }
        let name = self.text[name_start..self.pos].to_ascii_lowercase();
        self.skip_whitespace();
        if name.is_empty() || self.peek() != Some(b'=') {
            let found = self.text[name_start..].lines().next().unwrap_or_default();
            return Err(self.malformed(format!("expected 'name = value', found '{}'", found.trim())));
        }
        self.pos += 1;
        let escape = !VERBATIM_FIELDS.contains(&name.as_str());

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'"') => {
                    let start = self.pos + 1;
                    let end = closing_quote(self.bytes(), start)
                        .ok_or_else(|| self.malformed(format!("unterminated value for '{name}'")))?;
                    self.value_fragment(start..end, escape);
                    self.pos = end + 1;
                }
                Some(b'{') => {
                    let open = self.pos;
                    let close = matching_brace(self.bytes(), open)
                        .ok_or_else(|| self.malformed(format!("unterminated value for '{name}'")))?;
                    self.value_fragment(open + 1..close, escape);
                    self.pos = close + 1;
                }
                _ => {
                    let start = self.pos;
                    while let Some(b) = self.peek() {
                        if !(b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':')) {
                            break;
                        }
                        self.pos += 1;
                    }
                    if start == self.pos {
                        return Err(self.malformed(format!("missing value for '{name}'")));
                    }
                }
            }
            self.skip_whitespace();
            if self.peek() == Some(b'#') {
                self.pos += 1;
                continue;
            }
            return Ok(());
        }
    }

    fn value_fragment(&mut self, range: Range<usize>, escape: bool) {
        let fragment = &self.text[range.clone()];
        if has_unescaped_brace(fragment) {
            self.bad.push(fragment.to_string());
            return;
        }
        if escape {
            let escaped = escape_value(fragment);
            if escaped != fragment {
                self.splices.push(Splice::new(range, escaped));
            }
        }
    }
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn closing_quote(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'"' => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn has_unescaped_brace(fragment: &str) -> bool {
    let mut prev = '\0';
    for c in fragment.chars() {
        if (c == '{' || c == '}') && prev != '\\' {
            return true;
        }
        prev = if prev == '\\' && c == '\\' { '\0' } else { c };
    }
    false
}

/// Escape `& % $ # _` unless already preceded by a backslash.
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    let mut prev = '\0';
    for c in value.chars() {
        if matches!(c, '&' | '%' | '$' | '#' | '_') && prev != '\\' {
            out.push('\\');
        }
        out.push(c);
        prev = if prev == '\\' && c == '\\' { '\0' } else { c };
    }
    out
}

fn line_of(text: &str, offset: usize) -> usize {
    text.as_bytes()[..offset].iter().filter(|&&b| b == b'\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRY: &str = r#"@article{CitekeyArticle,
    author  = "P. J. Cohen",  % inlinecomment
    % comment
    title   = "The independence of the continuum hypothesis",
    journal = "Proceedings of the National Academy of Sciences",
    pages   = "1143--1148",
}"#;

    const MARKDOWN: &str = "\n# Some kind of markdown header\n- list\n- code block\n    ```bibtex\n    but not actually\n    ```\n- another list element\n";

    #[test]
    fn clean_entry_round_trips_with_comments() {
        let (bib, rest) = extract(ENTRY).unwrap();
        assert_eq!(bib, ENTRY);
        assert_eq!(rest, "\n".repeat(6));
    }

    #[test]
    fn entry_is_cut_out_of_surrounding_markdown() {
        let text = format!("{MARKDOWN}{ENTRY}{MARKDOWN}");
        let (bib, rest) = extract(&text).unwrap();
        assert_eq!(bib, ENTRY);
        assert_eq!(rest, format!("{MARKDOWN}\n\n\n\n\n\n{MARKDOWN}"));
        assert_eq!(rest.lines().count(), text.lines().count());
    }

    #[test]
    fn ampersand_in_value_is_escaped() {
        let (bib, _) = extract("@book{k,\n  title = {Salt & Pepper},\n  publisher = \"A \\& B\",\n}").unwrap();
        assert!(bib.contains(r"title = {Salt \& Pepper}"), "got: {bib}");
        assert!(bib.contains(r#"publisher = "A \& B""#), "got: {bib}");
        assert!(!bib.contains(r"\\&"));
    }

    #[test]
    fn keys_and_verbatim_fields_are_not_escaped() {
        let (bib, _) = extract("@misc{my_key,\n  url = {https://x.org/a_b},\n  note = {a_b},\n}").unwrap();
        assert!(bib.starts_with("@misc{my_key,"));
        assert!(bib.contains("url = {https://x.org/a_b}"));
        assert!(bib.contains(r"note = {a\_b}"));
    }

    #[test]
    fn nested_brace_fragment_is_rejected() {
        let err = extract("@book{k,\n  title=\"a{b\",\n}").unwrap_err();
        match err {
            Md2LatexError::BadBibtexBraces { fragments } => assert_eq!(fragments, vec!["a{b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn every_bad_fragment_is_listed() {
        let text = "@article{a,\n  journal = \"\\url{Proceedings}\",\n  year = 1963,\n}\n\n@book{b,\n  title = {The {IEEE} way},\n}";
        let err = extract(text).unwrap_err();
        match err {
            Md2LatexError::BadBibtexBraces { fragments } => {
                assert_eq!(fragments, vec!["\\url{Proceedings}", "The {IEEE} way"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn keyless_entry_extracts_but_has_no_label() {
        let text = "@article{\n    year     = 1963,\n}";
        let (bib, rest) = extract(text).unwrap();
        assert_eq!(bib, text);
        assert_eq!(rest, "\n\n");
        let err = extract_labels(text).unwrap_err();
        assert!(matches!(err, Md2LatexError::MalformedBibtex { line: 1, .. }));
    }

    #[test]
    fn labels_with_types_and_lines() {
        let text = format!("intro\n{ENTRY}\n\n@Book{{knuth84,\n  title = {{TeX}},\n  year = 1984 # \"\",\n}}\n@string{{ieee = \"IEEE\"}}\n");
        let labels = extract_labels(&text).unwrap();
        assert_eq!(
            labels,
            vec![
                BibLabel {
                    label: "CitekeyArticle".into(),
                    entry_type: "article".into(),
                    line: 2,
                },
                BibLabel {
                    label: "knuth84".into(),
                    entry_type: "book".into(),
                    line: 10,
                },
            ]
        );
    }

    #[test]
    fn unterminated_entry_is_malformed() {
        let err = extract("@book{k,\n  title = {open,\n").unwrap_err();
        assert!(matches!(err, Md2LatexError::MalformedBibtex { .. }));
    }

    #[test]
    fn email_addresses_are_not_entries() {
        let (bib, rest) = extract("mail me at foo@bar.com {today}\n").unwrap();
        assert_eq!(bib, "");
        assert_eq!(rest, "mail me at foo@bar.com {today}\n");
    }

    #[test]
    fn emptied_bibliography_section_is_stripped() {
        let md = "# Intro\n\nText.\n\n# References\n\n```bibtex\n\n```\n\n# Appendix\n\nMore.\n";
        let out = strip_bibliography_section(md);
        assert_eq!(out, "# Intro\n\nText.\n\n\n\n\n\n\n\n# Appendix\n\nMore.\n");
        let appendix_line = out.lines().position(|l| l == "# Appendix").unwrap() + 1;
        assert_eq!(appendix_line, 11);
    }

    #[test]
    fn non_empty_bibliography_section_is_kept() {
        let md = "# References\n\nSee the library.\n";
        assert_eq!(strip_bibliography_section(md), md);
    }

    #[test]
    fn escape_value_skips_escaped_characters() {
        assert_eq!(escape_value(r"50% \% 1_2 $x$"), r"50\% \% 1\_2 \$x\$");
    }
}
