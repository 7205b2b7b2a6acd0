//! Span replacement applied back-to-front.
//!
//! Rewriting passes (citations, islands) first collect `(range, replacement)`
//! pairs against the untouched source and only then build the output. Spans
//! are applied from the highest offset down, so earlier offsets never shift
//! and text outside the spans is copied byte-for-byte.

use std::ops::Range;

/// One pending replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    pub range: Range<usize>,
    pub replacement: String,
}

impl Splice {
    pub fn new(range: Range<usize>, replacement: impl Into<String>) -> Self {
        Self {
            range,
            replacement: replacement.into(),
        }
    }
}

/// Apply `splices` to `source`.
///
/// Spans must not overlap; overlapping or out-of-bounds spans are skipped
/// with a debug log rather than corrupting the text.
pub fn apply(source: &str, mut splices: Vec<Splice>) -> String {
    splices.sort_by(|a, b| b.range.start.cmp(&a.range.start));

    let mut out = source.to_string();
    let mut floor = source.len();
    for splice in splices {
        let Range { start, end } = splice.range;
        if start > end || end > floor || !source.is_char_boundary(start) || !source.is_char_boundary(end) {
            tracing::debug!("skipping invalid splice {}..{}", start, end);
            continue;
        }
        out.replace_range(start..end, &splice.replacement);
        floor = start;
    }
    out
}
