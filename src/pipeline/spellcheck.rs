//! Spellcheck adapter and a word-list checker.
//!
//! The dictionary lookup itself sits behind the [`SpellChecker`] trait so a
//! caller can plug in anything from a word list to a full spelling engine.
//! This module only decides *what* gets checked (prose doclets, with code,
//! math, links and citations blanked out) and maps the report back to source
//! lines as [`Diagnostic`]s.

use crate::error::{Diagnostic, Diagnostics, Md2LatexError};
use crate::pipeline::doclet::{Doclet, DocletKind};
use crate::pipeline::segment::{segment, PatternSet, SegmentKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

/// A likely misspelling with a suggested replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpellError {
    /// 1-based line within the checked text.
    pub line: usize,
    pub text: String,
    pub suggestion: String,
}

/// A word the checker does not know but will not guess at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpellWarning {
    pub line: usize,
    pub text: String,
}

/// Result of checking one piece of prose, keyed by the word as written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpellReport {
    pub errors: BTreeMap<String, Vec<SpellError>>,
    pub warnings: BTreeMap<String, Vec<SpellWarning>>,
    pub word_count: usize,
}

/// Pluggable spelling engine.
///
/// Implementations receive prose with markup already blanked out and one
/// source line per text line.
pub trait SpellChecker: Send + Sync {
    fn spellcheck(&self, prose: &str) -> SpellReport;
}

// ── Prose extraction ─────────────────────────────────────────────────────

static RE_SIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\[sic\]").unwrap());
static RE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());
static RE_INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`\n]*`").unwrap());
static RE_INLINE_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$[^$\n]+\$").unwrap());
static RE_ANGLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<>\n]*>").unwrap());
static RE_LINK_TARGET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\]\([^)\n]*\)").unwrap());
static RE_ANNOTATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:caption|label)[ \t]*:").unwrap());
static RE_ORDINAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+(?:st|nd|rd|th|s)\b").unwrap());
static RE_NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s'\-]|[\d_]").unwrap());
static RE_DASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}|(?:^|\s)-+|-+(?:\s|$)").unwrap());

/// Blank out everything in `text` that is not a word, keeping line breaks.
///
/// URLs, inline code, inline math, citations and other `<...>` tokens, link
/// targets, `[sic]`, numbers and punctuation (except in-word `'` and `-`)
/// become spaces.
pub fn words_only(text: &str) -> String {
    let s = RE_SIC.replace_all(text, " ");
    let s = RE_LINK_TARGET.replace_all(&s, "] ");
    let s = RE_URL.replace_all(&s, " ");
    let s = RE_INLINE_CODE.replace_all(&s, " ");
    let s = RE_INLINE_MATH.replace_all(&s, " ");
    let s = RE_ANGLE.replace_all(&s, " ");
    let s = RE_ANNOTATION.replace_all(&s, " ");
    let s = RE_ORDINAL.replace_all(&s, " ");
    let s = RE_NON_WORD.replace_all(&s, " ");
    s.lines()
        .map(|line| RE_DASHES.replace_all(line, " ").into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

fn count_words(words: &str) -> usize {
    words.split_whitespace().count()
}

/// Prose-only word count of a Markdown document.
///
/// Code, literal, math, comment and front-matter blocks do not count.
pub fn word_count(markdown: &str) -> usize {
    segment(markdown, PatternSet::large(), 1)
        .iter()
        .filter(|s| {
            matches!(
                s.kind,
                SegmentKind::Any | SegmentKind::List | SegmentKind::Quote | SegmentKind::Table
            )
        })
        .map(|s| count_words(&words_only(&s.text)))
        .sum()
}

/// Text of a doclet that is worth spellchecking.
fn prose_of(doclet: &Doclet) -> Option<&str> {
    match &doclet.kind {
        DocletKind::Header { title, .. } => Some(title.as_str()),
        kind if kind.is_prose() => Some(doclet.content.as_str()),
        _ => None,
    }
}

/// Spellcheck every prose doclet and record the findings.
///
/// Likely misspellings become errors and unknown words warnings; the driver
/// downgrades the errors unless spellchecking is fatal. Returns the number of
/// words checked.
pub fn check(doclets: &[Doclet], checker: &dyn SpellChecker, diagnostics: &mut Diagnostics) -> usize {
    let mut words = 0;
    for doclet in doclets {
        let Some(prose) = prose_of(doclet) else {
            continue;
        };
        let source_lines: Vec<&str> = prose.lines().collect();
        let report = checker.spellcheck(&words_only(prose));
        words += report.word_count;

        let place = |line: usize| {
            let text = source_lines
                .get(line.saturating_sub(1))
                .map(|l| l.trim().to_string())
                .unwrap_or_default();
            (doclet.line + line.saturating_sub(1), text)
        };
        for (word, hits) in report.errors {
            for hit in hits {
                let (line, text) = place(hit.line);
                diagnostics.error(Diagnostic::Misspelled {
                    word: word.clone(),
                    suggestion: hit.suggestion,
                    line,
                    text,
                });
            }
        }
        for (word, hits) in report.warnings {
            for hit in hits {
                let (line, text) = place(hit.line);
                diagnostics.warn(Diagnostic::UnknownWord {
                    word: word.clone(),
                    line,
                    text,
                });
            }
        }
    }
    tracing::debug!("spellchecked {} words", words);
    words
}

// ── Word-list checker ────────────────────────────────────────────────────

/// Dictionary-backed checker.
///
/// * all-caps tokens (acronyms) are skipped;
/// * known words, and their `'s` possessives, pass;
/// * capitalised unknown words are probably names: warning;
/// * other unknown words one edit away from a dictionary word: error with
///   that word as suggestion, otherwise warning.
#[derive(Debug, Clone, Default)]
pub struct WordListSpellChecker {
    words: HashSet<String>,
}

impl WordListSpellChecker {
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words
                .into_iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty() && !w.starts_with('#'))
                .collect(),
        }
    }

    /// Load a newline-separated word list; `#` lines are comments.
    pub fn from_path(path: &Path) -> Result<Self, Md2LatexError> {
        if !path.exists() {
            return Err(Md2LatexError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|source| Md2LatexError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let checker = Self::from_words(text.lines());
        tracing::debug!("loaded {} dictionary words from {}", checker.len(), path.display());
        Ok(checker)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn knows(&self, lower: &str) -> bool {
        self.words.contains(lower)
            || lower
                .strip_suffix("'s")
                .or_else(|| lower.strip_suffix('\''))
                .is_some_and(|stem| self.words.contains(stem))
    }

    /// Smallest dictionary word one edit (delete, transpose, replace,
    /// insert) away from `lower`.
    fn suggestion(&self, lower: &str) -> Option<String> {
        let chars: Vec<char> = lower.chars().collect();
        let mut found = BTreeSet::new();
        let mut consider = |candidate: String| {
            if self.words.contains(&candidate) {
                found.insert(candidate);
            }
        };
        for i in 0..=chars.len() {
            if i < chars.len() {
                let mut c = chars.clone();
                c.remove(i);
                consider(c.into_iter().collect());
            }
            if i + 1 < chars.len() {
                let mut c = chars.clone();
                c.swap(i, i + 1);
                consider(c.into_iter().collect());
            }
            for letter in 'a'..='z' {
                if i < chars.len() && chars[i] != letter {
                    let mut c = chars.clone();
                    c[i] = letter;
                    consider(c.into_iter().collect());
                }
                let mut c = chars.clone();
                c.insert(i, letter);
                consider(c.into_iter().collect());
            }
        }
        found.into_iter().next()
    }
}

fn is_all_caps(token: &str) -> bool {
    token.chars().any(char::is_alphabetic) && !token.chars().any(char::is_lowercase)
}

fn is_capitalised(token: &str) -> bool {
    let mut chars = token.chars();
    chars.next().is_some_and(char::is_uppercase) && chars.all(|c| !c.is_uppercase())
}

impl SpellChecker for WordListSpellChecker {
    fn spellcheck(&self, prose: &str) -> SpellReport {
        let mut report = SpellReport::default();
        for (i, line) in prose.lines().enumerate() {
            for token in line.split_whitespace() {
                report.word_count += 1;
                for part in token.split('-') {
                    let word = part.trim_matches('\'');
                    if word.is_empty() || is_all_caps(word) {
                        continue;
                    }
                    let lower = word.to_lowercase();
                    if self.knows(&lower) {
                        continue;
                    }
                    let suggestion = if is_capitalised(word) {
                        None
                    } else {
                        self.suggestion(&lower)
                    };
                    match suggestion {
                        Some(suggestion) => {
                            report.errors.entry(word.to_string()).or_default().push(SpellError {
                                line: i + 1,
                                text: line.trim().to_string(),
                                suggestion,
                            })
                        }
                        None => report
                            .warnings
                            .entry(word.to_string())
                            .or_default()
                            .push(SpellWarning {
                                line: i + 1,
                                text: line.trim().to_string(),
                            }),
                    }
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> WordListSpellChecker {
        WordListSpellChecker::from_words(["the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "state", "of", "art", "# comment"])
    }

    #[test]
    fn words_only_blanks_markup() {
        let out = words_only("See <foo, 10> and `code` at https://x.org, $x^2$ in 1990s [sic]!");
        assert_eq!(out.split_whitespace().collect::<Vec<_>>(), vec!["See", "and", "at", "in"]);
    }

    #[test]
    fn words_only_keeps_lines_and_inner_hyphens() {
        let out = words_only("state-of-the-art -- done\nsecond [link](https://a.b) line");
        assert_eq!(out.lines().count(), 2);
        assert!(out.contains("state-of-the-art"));
        assert!(!out.contains("--"));
        assert_eq!(out.lines().nth(1).unwrap().split_whitespace().collect::<Vec<_>>(), vec!["second", "link", "line"]);
    }

    #[test]
    fn word_count_skips_code_and_math() {
        let md = "---\ntitle: x y z\n---\n# Title here\n\nOne two three.\n\n```python\nnot counted at all\n```\n\n- four five\n";
        assert_eq!(word_count(md), 7);
    }

    #[test]
    fn checker_classifies_words() {
        let report = checker().spellcheck("the quikc fox\nNASA and Bob jumps zzzzzz\nstate-of-the-art dog's");
        assert_eq!(report.word_count, 10);
        assert_eq!(
            report.errors.get("quikc"),
            Some(&vec![SpellError {
                line: 1,
                text: "the quikc fox".into(),
                suggestion: "quick".into(),
            }])
        );
        assert!(report.warnings.contains_key("Bob"));
        assert!(report.warnings.contains_key("zzzzzz"));
        assert!(report.warnings.contains_key("and"));
        assert!(!report.warnings.contains_key("NASA"));
        assert!(!report.errors.contains_key("state"));
        assert!(!report.warnings.contains_key("dog's"));
    }

    #[test]
    fn comment_lines_are_not_words() {
        assert_eq!(checker().len(), 11);
    }

    #[test]
    fn check_places_findings_on_source_lines() {
        let doclet = Doclet {
            kind: DocletKind::Plain,
            label: None,
            caption: None,
            content: "the fox\nthe brwn dog".into(),
            appendix: false,
            line: 10,
        };
        let code = Doclet {
            kind: DocletKind::Code {
                language: String::new(),
            },
            content: "brwn".into(),
            line: 20,
            ..doclet.clone()
        };
        let mut diags = Diagnostics::new();
        let words = check(&[doclet, code], &checker(), &mut diags);
        assert_eq!(words, 5);
        assert_eq!(
            diags.errors,
            vec![Diagnostic::Misspelled {
                word: "brwn".into(),
                suggestion: "brown".into(),
                line: 11,
                text: "the brwn dog".into(),
            }]
        );
    }

    #[test]
    fn missing_dictionary_is_reported() {
        let err = WordListSpellChecker::from_path(Path::new("/nonexistent/words.txt")).unwrap_err();
        assert!(matches!(err, Md2LatexError::FileNotFound { .. }));
    }
}
