//! Document-wide label registry.
//!
//! Labels are unique case-insensitively. The registry keeps two maps:
//! lowercase key → canonical spelling, and canonical spelling → where the
//! label came from. Registering a clashing label never overwrites the first
//! one; it returns a [`Diagnostic::DuplicateLabel`] instead.

use crate::error::Diagnostic;
use serde::Serialize;
use std::collections::HashMap;

/// Origin of a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "entry_type")]
pub enum LabelKind {
    /// A bibliography entry, with its entry type (`book`, `article`...).
    Bibliography(String),
    Table,
    Figure,
    Equation,
    Header,
    Code,
    Quote,
}

impl LabelKind {
    /// Whether the label points inside the document (rendered with `\ref`).
    pub fn is_in_document(&self) -> bool {
        !matches!(self, LabelKind::Bibliography(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    canonical: String,
    kind: LabelKind,
    line: usize,
}

#[derive(Debug, Clone, Default)]
pub struct LabelRegistry {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `label`. On a case-insensitive clash the first registration
    /// is kept and a duplicate diagnostic is returned.
    pub fn register(&mut self, label: &str, kind: LabelKind, line: usize) -> Result<(), Diagnostic> {
        let key = label.to_lowercase();
        if let Some(existing) = self.entries.get(&key) {
            return Err(Diagnostic::DuplicateLabel {
                label: label.to_string(),
                line,
                first_line: existing.line,
            });
        }
        self.order.push(key.clone());
        self.entries.insert(
            key,
            Entry {
                canonical: label.to_string(),
                kind,
                line,
            },
        );
        Ok(())
    }

    /// Look up a label case-insensitively, returning its canonical spelling
    /// and origin.
    pub fn resolve(&self, label: &str) -> Option<(&str, &LabelKind)> {
        self.entries
            .get(&label.to_lowercase())
            .map(|e| (e.canonical.as_str(), &e.kind))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.contains_key(&label.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical labels in registration order.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &LabelKind)> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k))
            .map(|e| (e.canonical.as_str(), &e.kind))
    }
}

/// Turn a title into a label-safe slug: lowercase ASCII alphanumerics
/// separated by single dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut dash = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(c.to_ascii_lowercase());
            dash = false;
        } else {
            dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_duplicates_are_rejected() {
        let mut reg = LabelRegistry::new();
        reg.register("tbl-Results", LabelKind::Table, 3).unwrap();
        let err = reg.register("TBL-results", LabelKind::Table, 9).unwrap_err();
        assert_eq!(
            err,
            Diagnostic::DuplicateLabel {
                label: "TBL-results".into(),
                line: 9,
                first_line: 3,
            }
        );
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.resolve("tbl-results").unwrap().0, "tbl-Results");
    }

    #[test]
    fn one_error_per_duplicate_pair() {
        let mut reg = LabelRegistry::new();
        let labels = ["a", "b", "A", "c", "B"];
        let errors = labels
            .iter()
            .enumerate()
            .filter_map(|(i, l)| reg.register(l, LabelKind::Header, i + 1).err())
            .count();
        assert_eq!(errors, 2);
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn bibliography_kind_is_not_in_document() {
        assert!(!LabelKind::Bibliography("book".into()).is_in_document());
        assert!(LabelKind::Equation.is_in_document());
    }

    #[test]
    fn labels_iterate_in_registration_order() {
        let mut reg = LabelRegistry::new();
        reg.register("z", LabelKind::Figure, 1).unwrap();
        reg.register("a", LabelKind::Code, 2).unwrap();
        let names: Vec<_> = reg.labels().map(|(l, _)| l).collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[test]
    fn slugify_titles() {
        assert_eq!(slugify("Related Work"), "related-work");
        assert_eq!(slugify("  1.2 Results & Discussion!  "), "1-2-results-discussion");
        assert_eq!(slugify("Naïve"), "na-ve");
        assert_eq!(slugify("***"), "");
    }
}
