//! Section segmentation: split raw Markdown into typed segments.
//!
//! ## How it works
//!
//! A [`PatternSet`] is an *ordered* list of `(kind, regex)` pairs. Starting at
//! the beginning of the text, the segmenter asks every pattern for its next
//! match and keeps the one starting earliest; on a tie the pattern declared
//! first wins. Text before that match becomes an [`SegmentKind::Any`] segment,
//! the match becomes its own segment, and scanning resumes at the match end.
//!
//! Two sets exist:
//!
//! * [`PatternSet::large`] — block structures: comment, yaml, table, math,
//!   literal, code, quote, list.
//! * [`PatternSet::small`] — applied to the `Any` leftovers: header, image.
//!
//! ## Invariants
//!
//! * Concatenating `segment.text` of all segments reproduces the input exactly.
//! * Segments are ordered by `start` and never overlap.
//! * A zero-length match cannot stall the scan: the character at the match
//!   position is folded into the surrounding `Any` text and scanning moves on.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Structural kind of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Comment,
    Yaml,
    Table,
    Math,
    Literal,
    Code,
    Quote,
    List,
    Header,
    Image,
    Any,
}

impl SegmentKind {
    pub fn name(self) -> &'static str {
        match self {
            SegmentKind::Comment => "comment",
            SegmentKind::Yaml => "yaml",
            SegmentKind::Table => "table",
            SegmentKind::Math => "math",
            SegmentKind::Literal => "literal",
            SegmentKind::Code => "code",
            SegmentKind::Quote => "quote",
            SegmentKind::List => "list",
            SegmentKind::Header => "header",
            SegmentKind::Image => "image",
            SegmentKind::Any => "any",
        }
    }
}

/// A contiguous, typed slice of the scanned text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
    /// Byte offset of the segment in the scanned text.
    pub start: usize,
    /// 1-based line of `start`, offset by the line the scan began on.
    pub line: usize,
}

impl Segment {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

/// Ordered pattern registry. Declaration order breaks ties.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<(SegmentKind, Regex)>,
}

// ── Patterns ─────────────────────────────────────────────────────────────

// One or more `caption:` / `label:` lines, optionally separated from the
// block by blank lines.
const LEADING_ANNOTATIONS: &str = r"(?:[ \t]*(?:caption|label)[ \t]*:[^\n]*\n(?:[ \t]*\n)*)+";
// At most one caption/label pair directly after a block (no blank line in
// between). Only blocks without leading annotations take them, so the
// annotations of a following block stay with that block.
const TRAILING_ANNOTATIONS: &str = r"(?:[ \t]*(?:caption|label)[ \t]*:[^\n]*(?:\n|\z)){0,2}";

/// `block` with either leading annotations or trailing ones, never both.
fn annotated(block: &str) -> String {
    format!(r"(?m)^(?:{LEADING_ANNOTATIONS}{block}|{block}{TRAILING_ANNOTATIONS})")
}

static RE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static RE_YAML: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A---[ \t]*\n(?s:.*?)\n---[ \t]*(?:\n|\z)").unwrap());

static RE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&annotated(r"(?:[ \t]*\|[^\n]*(?:\n|\z))+")).unwrap()
});

static RE_MATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&annotated(r"[ \t]*\$\$[ \t]*\n(?s:.*?)\$\$[ \t]*(?:\n|\z)")).unwrap()
});

static RE_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*```[ \t]*\n(?:(?s:.*?)\n)?[ \t]*```[ \t]*(?:\n|\z)").unwrap()
});

static RE_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&annotated(
        r"[ \t]*```[ \t]*[A-Za-z0-9_+#\-]+[^\n]*\n(?:(?s:.*?)\n)?[ \t]*```[ \t]*(?:\n|\z)",
    ))
    .unwrap()
});

// Two or more consecutive `>` lines; a single `>` line stays prose.
static RE_QUOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&annotated(r"(?:[ \t]*>[^\n]*\n)+[ \t]*>[^\n]*(?:\n|\z)")).unwrap()
});

// Items plus indented continuation lines; blank lines only inside the block.
static RE_LIST: Lazy<Regex> = Lazy::new(|| {
    let item = r"[ \t]*(?:\d+\.|[-*+])[ \t]+[^\n]*(?:\n|\z)";
    let continuation = r"(?:[ \t]+[^\n]*\S[^\n]*(?:\n|\z))";
    Regex::new(&format!(
        r"(?m)^{item}{continuation}*(?:(?:[ \t]*\n)*{item}{continuation}*)*"
    ))
    .unwrap()
});

static RE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#+[ \t]+[^\n]*\S[^\n]*(?:\n|\z)").unwrap());

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!\[[^\]\n]*\]\([^)\s]+(?:[ \t]+"[^"\n]*")?\)"#).unwrap()
});

static LARGE: Lazy<PatternSet> = Lazy::new(|| {
    PatternSet::new(vec![
        (SegmentKind::Comment, RE_COMMENT.clone()),
        (SegmentKind::Yaml, RE_YAML.clone()),
        (SegmentKind::Table, RE_TABLE.clone()),
        (SegmentKind::Math, RE_MATH.clone()),
        (SegmentKind::Literal, RE_LITERAL.clone()),
        (SegmentKind::Code, RE_CODE.clone()),
        (SegmentKind::Quote, RE_QUOTE.clone()),
        (SegmentKind::List, RE_LIST.clone()),
    ])
});

static SMALL: Lazy<PatternSet> = Lazy::new(|| {
    PatternSet::new(vec![
        (SegmentKind::Header, RE_HEADER.clone()),
        (SegmentKind::Image, RE_IMAGE.clone()),
    ])
});

impl PatternSet {
    pub fn new(patterns: Vec<(SegmentKind, Regex)>) -> Self {
        Self { patterns }
    }

    /// Block-level patterns, in precedence order.
    pub fn large() -> &'static PatternSet {
        &LARGE
    }

    /// Header and image patterns applied inside `Any` segments.
    pub fn small() -> &'static PatternSet {
        &SMALL
    }

    /// Earliest match at or after `pos`; ties go to the first declared pattern.
    fn next_match(&self, text: &str, pos: usize) -> Option<(SegmentKind, usize, usize)> {
        let mut best: Option<(SegmentKind, usize, usize)> = None;
        for (kind, re) in &self.patterns {
            if let Some(m) = re.find_at(text, pos) {
                let better = match best {
                    Some((_, start, _)) => m.start() < start,
                    None => true,
                };
                if better {
                    best = Some((*kind, m.start(), m.end()));
                }
            }
        }
        best
    }
}

/// Split `text` into segments using `patterns`.
///
/// `first_line` is the 1-based line `text` starts on in the source document,
/// so nested scans report document lines.
pub fn segment(text: &str, patterns: &PatternSet, first_line: usize) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut lines = LineTracker::new(text, first_line);
    let mut any_start = 0;
    let mut pos = 0;

    while pos < text.len() {
        let Some((kind, start, end)) = patterns.next_match(text, pos) else {
            break;
        };

        if start == end {
            // Zero-length match: fold one character into the pending Any text.
            let step = text[start..].chars().next().map_or(1, char::len_utf8);
            pos = start + step;
            continue;
        }

        if any_start < start {
            segments.push(Segment {
                kind: SegmentKind::Any,
                text: text[any_start..start].to_string(),
                start: any_start,
                line: lines.line_at(any_start),
            });
        }
        segments.push(Segment {
            kind,
            text: text[start..end].to_string(),
            start,
            line: lines.line_at(start),
        });
        pos = end;
        any_start = end;
    }

    if any_start < text.len() {
        segments.push(Segment {
            kind: SegmentKind::Any,
            text: text[any_start..].to_string(),
            start: any_start,
            line: lines.line_at(any_start),
        });
    }

    segments
}

/// Incremental byte-offset to line-number conversion for monotonic queries.
struct LineTracker<'a> {
    text: &'a str,
    offset: usize,
    line: usize,
}

impl<'a> LineTracker<'a> {
    fn new(text: &'a str, first_line: usize) -> Self {
        Self {
            text,
            offset: 0,
            line: first_line,
        }
    }

    fn line_at(&mut self, offset: usize) -> usize {
        if offset >= self.offset {
            self.line += self.text.as_bytes()[self.offset..offset]
                .iter()
                .filter(|&&b| b == b'\n')
                .count();
            self.offset = offset;
        }
        self.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(segments: &[Segment]) -> Vec<SegmentKind> {
        segments.iter().map(|s| s.kind).collect()
    }

    fn reconstruct(segments: &[Segment]) -> String {
        segments.iter().map(|s| s.text.as_str()).collect()
    }

    const DOC: &str = "---\ntitle: T\n---\n\n# Intro\n\nSome text.\n\n<!-- note -->\n\ncaption: Results\nlabel: tbl-results\n| a | b |\n|---|---|\n| 1 | 2 |\n\n$$\n%\\label{eq-one}\nx = 1\n$$\n\n```\nraw\n```\n\ncaption: Hello\nlabel: code-hello\n```python\nprint('hi')\n```\n\ncaption: Someone\n> line one\n> line two\n\n- a\n- b\n  continued\n\nTail.\n";

    #[test]
    fn large_scan_finds_every_block() {
        let segments = segment(DOC, PatternSet::large(), 1);
        let found: Vec<_> = kinds(&segments)
            .into_iter()
            .filter(|k| *k != SegmentKind::Any)
            .collect();
        assert_eq!(
            found,
            vec![
                SegmentKind::Yaml,
                SegmentKind::Comment,
                SegmentKind::Table,
                SegmentKind::Math,
                SegmentKind::Literal,
                SegmentKind::Code,
                SegmentKind::Quote,
                SegmentKind::List,
            ]
        );
    }

    #[test]
    fn segments_partition_the_input() {
        let segments = segment(DOC, PatternSet::large(), 1);
        assert_eq!(reconstruct(&segments), DOC);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start);
        }
    }

    #[test]
    fn segmentation_is_deterministic() {
        let a = segment(DOC, PatternSet::large(), 1);
        let b = segment(DOC, PatternSet::large(), 1);
        assert_eq!(a, b);
    }

    #[test]
    fn annotations_belong_to_their_block() {
        let segments = segment(DOC, PatternSet::large(), 1);
        let table = segments.iter().find(|s| s.kind == SegmentKind::Table).unwrap();
        assert!(table.text.starts_with("caption: Results\nlabel: tbl-results\n|"));
        let code = segments.iter().find(|s| s.kind == SegmentKind::Code).unwrap();
        assert!(code.text.starts_with("caption: Hello"));
        assert_eq!(code.line, 26);
    }

    #[test]
    fn annotations_of_the_next_block_stay_with_it() {
        let text = "caption: Results\nlabel: tbl-results\n| a |\n|---|\ncaption: Entry\nlabel: code-main\n```rust\nfn main() {}\n```\n";
        let segments = segment(text, PatternSet::large(), 1);
        assert_eq!(kinds(&segments), vec![SegmentKind::Table, SegmentKind::Code]);
        assert!(segments[0].text.ends_with("|---|\n"), "{:?}", segments[0].text);
        assert!(segments[1].text.starts_with("caption: Entry\nlabel: code-main\n```rust"));
        assert_eq!(segments[1].line, 5);
    }

    #[test]
    fn trailing_annotations_stop_after_one_pair() {
        let text = "| a |\n|---|\ncaption: A\nlabel: tbl-a\ncaption: stray\n";
        let segments = segment(text, PatternSet::large(), 1);
        assert_eq!(kinds(&segments), vec![SegmentKind::Table, SegmentKind::Any]);
        assert_eq!(segments[1].text, "caption: stray\n");
    }

    #[test]
    fn yaml_only_at_document_start() {
        let text = "intro\n---\nnot: yaml\n---\n";
        let segments = segment(text, PatternSet::large(), 1);
        assert!(segments.iter().all(|s| s.kind != SegmentKind::Yaml));
    }

    #[test]
    fn single_quote_line_is_not_a_quote_block() {
        let segments = segment("> only one\n\ntext\n", PatternSet::large(), 1);
        assert_eq!(kinds(&segments), vec![SegmentKind::Any]);
    }

    #[test]
    fn ties_go_to_the_first_declared_pattern() {
        let set = PatternSet::new(vec![
            (SegmentKind::Header, Regex::new("ab").unwrap()),
            (SegmentKind::Image, Regex::new("abc").unwrap()),
        ]);
        let segments = segment("xxabc", &set, 1);
        assert_eq!(kinds(&segments), vec![SegmentKind::Any, SegmentKind::Header, SegmentKind::Any]);
        assert_eq!(segments[1].text, "ab");
    }

    #[test]
    fn zero_length_match_does_not_stall() {
        let set = PatternSet::new(vec![(SegmentKind::Header, Regex::new("x*").unwrap())]);
        let segments = segment("abxxcd", &set, 1);
        assert_eq!(reconstruct(&segments), "abxxcd");
        assert_eq!(
            kinds(&segments),
            vec![SegmentKind::Any, SegmentKind::Header, SegmentKind::Any]
        );
        assert_eq!(segments[0].text, "ab");
        assert_eq!(segments[1].text, "xx");
        assert_eq!(segments[2].text, "cd");
    }

    #[test]
    fn zero_length_match_handles_multibyte_text() {
        let set = PatternSet::new(vec![(SegmentKind::Header, Regex::new("z*").unwrap())]);
        let segments = segment("héllo", &set, 1);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "héllo");
    }

    #[test]
    fn empty_text_yields_no_segments() {
        assert!(segment("", PatternSet::large(), 1).is_empty());
    }

    #[test]
    fn small_scan_headers_and_images() {
        let text = "# Title\nSee ![a cat](cat.png) here.\n## Sub\n";
        let segments = segment(text, PatternSet::small(), 10);
        assert_eq!(
            kinds(&segments),
            vec![
                SegmentKind::Header,
                SegmentKind::Any,
                SegmentKind::Image,
                SegmentKind::Any,
                SegmentKind::Header,
            ]
        );
        assert_eq!(segments[0].line, 10);
        assert_eq!(segments[4].line, 12);
        assert_eq!(reconstruct(&segments), text);
    }

    #[test]
    fn list_with_blank_line_between_items_is_one_segment() {
        let text = "1. first\n\n2. second\n\nafter\n";
        let segments = segment(text, PatternSet::large(), 1);
        assert_eq!(segments[0].kind, SegmentKind::List);
        assert_eq!(segments[0].text, "1. first\n\n2. second\n");
    }
}
