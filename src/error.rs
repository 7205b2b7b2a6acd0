//! Error types for the md2latex library.
//!
//! Two distinct types reflect two distinct failure modes:
//!
//! * [`Md2LatexError`] — **Fatal**: the conversion cannot proceed at all
//!   (missing input, unknown template, a phase finished with errors, the
//!   compiler timed out). Returned as `Err(Md2LatexError)` from the top-level
//!   `convert*` functions.
//!
//! * [`Diagnostic`] — **Placed findings**: a single problem at a known place
//!   in the document (missing caption on line 12, unresolved citation on
//!   line 40). Phases push them into a [`Diagnostics`] accumulator and keep
//!   going, so an author sees every problem of a document in one run instead
//!   of fixing them one at a time.
//!
//! Whether the collected errors stop the run is decided at the phase
//! boundary, by [`Diagnostics::into_phase_result`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the md2latex library.
#[derive(Debug, Error)]
pub enum Md2LatexError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file exists but could not be read.
    #[error("failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Template name is not one of the supported document styles.
    #[error("unknown template '{name}' (supported: default, chicago, ieee)")]
    UnknownTemplate { name: String },

    // ── Bibliography errors ───────────────────────────────────────────────
    /// Field values with nested unescaped braces. Never repaired automatically.
    #[error(
        "bad lines discovered containing unescaped '{{' or '}}', replace them at the source:\n{}",
        .fragments.iter().map(|f| format!("    - {f}")).collect::<Vec<_>>().join("\n")
    )]
    BadBibtexBraces { fragments: Vec<String> },

    /// A BibTeX entry could not be parsed (unterminated value, missing key...).
    #[error("malformed BibTeX entry at line {line}: {detail}")]
    MalformedBibtex { line: usize, detail: String },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// A phase finished with at least one error diagnostic.
    #[error("{phase} - {} errors!\n{}", .errors.len(), .errors.iter().map(|e| format!("    {e}")).collect::<Vec<_>>().join("\n"))]
    PhaseFailed {
        phase: &'static str,
        errors: Vec<Diagnostic>,
    },

    /// A citation candidate matched the token scanner but none of the
    /// citation shapes. Indicates a gap in the pattern set, not an authoring
    /// mistake.
    #[error("internal error: citation token '{token}' on line {line} matched no citation shape")]
    UnparseableCitation { token: String, line: usize },

    // ── Compiler errors ───────────────────────────────────────────────────
    /// A compiler executable is not installed or not on `PATH`.
    #[error("'{program}' was not found on PATH\nInstall a TeX distribution (TeX Live, MiKTeX) first.")]
    ToolNotFound { program: String },

    /// A compiler step exited with a non-zero status.
    #[error("compile step {step}/{total} '{command}' failed with status {status}\n{log}")]
    CompileFailed {
        step: usize,
        total: usize,
        command: String,
        status: i32,
        log: String,
    },

    /// A compiler step exceeded the wall-clock timeout and was killed.
    #[error("compile step {step}/{total} '{command}' timed out after {secs}s\nIncrease --compile-timeout.")]
    CompileTimeout {
        step: usize,
        total: usize,
        command: String,
        secs: u64,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A placed, non-fatal finding.
///
/// Whether a diagnostic counts as an error or a warning is decided by the
/// list it is pushed into, see [`Diagnostics`].
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum Diagnostic {
    // ── Structure ─────────────────────────────────────────────────────────
    #[error("line {line}: {kind} has no caption, add a 'caption: ...' line")]
    MissingCaption { kind: String, line: usize },

    #[error("line {line}: {kind} has no label, add a 'label: ...' line")]
    MissingLabel { kind: String, line: usize },

    #[error("line {line}: {kind} had no caption, using \"{caption}\"")]
    AutoCaption {
        kind: String,
        caption: String,
        line: usize,
    },

    #[error("line {line}: {kind} had no label, using \"{label}\"")]
    AutoLabel {
        kind: String,
        label: String,
        line: usize,
    },

    #[error("line {line}: duplicate label \"{label}\" (first registered on line {first_line})")]
    DuplicateLabel {
        label: String,
        line: usize,
        first_line: usize,
    },

    #[error("line {line}: header \"{title}\" is {depth} levels deep, at most 4 are supported")]
    HeaderTooDeep {
        title: String,
        depth: usize,
        line: usize,
    },

    #[error("line {line}: appendix header is not followed by any content")]
    DanglingAppendix { line: usize },

    #[error("line {line}: image \"{path}\" uses a forbidden extension, convert it to .png or .pdf")]
    ForbiddenImageExtension { path: String, line: usize },

    #[error("line {line}: naked url \"{url}\", wrap it like [text]({url}) or <{url}>")]
    NakedUrl { url: String, line: usize },

    // ── Citations ─────────────────────────────────────────────────────────
    #[error("line {line}: \"[{content}]\" looks like a citation, use angle-citation style <{content}>")]
    BracketCitation { content: String, line: usize },

    #[error("line {line}: \"[{content}]\" might be a citation, angle-citation style is <label>")]
    PossibleBracketCitation { content: String, line: usize },

    #[error("line {line}: citation <{reference}> not found in the bibliography or document labels")]
    UnresolvedCitation { reference: String, line: usize },

    #[error("line {line}: <{reference}> points inside the document, page qualifiers are ignored")]
    QualifiedCrossReference { reference: String, line: usize },

    // ── Front matter ──────────────────────────────────────────────────────
    #[error("line {line}: front matter could not be parsed: {detail}")]
    InvalidFrontMatter { detail: String, line: usize },

    #[error("front matter field \"{field}\" is not used by the {template} template")]
    UnusedFrontMatter { field: String, template: String },

    // ── Spellcheck ────────────────────────────────────────────────────────
    #[error("line {line}: \"{word}\" is misspelled, did you mean \"{suggestion}\"?\n    {text}")]
    Misspelled {
        word: String,
        suggestion: String,
        line: usize,
        text: String,
    },

    #[error("line {line}: \"{word}\" is not a known word\n    {text}")]
    UnknownWord {
        word: String,
        line: usize,
        text: String,
    },

    // ── Resources ─────────────────────────────────────────────────────────
    #[error("failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("failed to copy '{path}': {reason}")]
    CopyFailed { path: String, reason: String },
}

/// Errors and warnings collected by one phase.
///
/// Passed by `&mut` into each phase instead of living in shared state; the
/// driver creates a fresh accumulator per phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostics {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, diagnostic: Diagnostic) {
        self.errors.push(diagnostic);
    }

    pub fn warn(&mut self, diagnostic: Diagnostic) {
        self.warnings.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    /// Move every error into the warning list.
    ///
    /// Used for non-fatal spellcheck runs.
    pub fn downgrade_errors(&mut self) {
        self.warnings.append(&mut self.errors);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Log everything and turn remaining errors into a fatal phase failure.
    ///
    /// Returns the warnings on success so the driver can report them.
    pub fn into_phase_result(self, phase: &'static str) -> Result<Vec<Diagnostic>, Md2LatexError> {
        if self.warnings.is_empty() {
            tracing::debug!("{} - 0 warnings!", phase);
        } else {
            tracing::warn!("{} - {} warnings!", phase, self.warnings.len());
            for warning in &self.warnings {
                tracing::warn!("{}", warning);
            }
        }

        if self.errors.is_empty() {
            tracing::debug!("{} - 0 errors!", phase);
            Ok(self.warnings)
        } else {
            tracing::error!("{} - {} errors!", phase, self.errors.len());
            for error in &self.errors {
                tracing::error!("{}", error);
            }
            Err(Md2LatexError::PhaseFailed {
                phase,
                errors: self.errors,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_failed_display_lists_errors() {
        let e = Md2LatexError::PhaseFailed {
            phase: "doclets",
            errors: vec![
                Diagnostic::MissingCaption {
                    kind: "table".into(),
                    line: 3,
                },
                Diagnostic::MissingLabel {
                    kind: "table".into(),
                    line: 3,
                },
            ],
        };
        let msg = e.to_string();
        assert!(msg.contains("2 errors"), "got: {msg}");
        assert!(msg.contains("line 3: table has no caption"), "got: {msg}");
    }

    #[test]
    fn bad_braces_display_lists_every_fragment() {
        let e = Md2LatexError::BadBibtexBraces {
            fragments: vec!["a{b".into(), "\\url{x}".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("    - a{b"), "got: {msg}");
        assert!(msg.contains("    - \\url{x}"), "got: {msg}");
    }

    #[test]
    fn compile_timeout_display() {
        let e = Md2LatexError::CompileTimeout {
            step: 2,
            total: 4,
            command: "biber paper".into(),
            secs: 60,
        };
        assert!(e.to_string().contains("2/4"));
        assert!(e.to_string().contains("60s"));
    }

    #[test]
    fn warnings_do_not_fail_a_phase() {
        let mut diags = Diagnostics::new();
        diags.warn(Diagnostic::PossibleBracketCitation {
            content: "sic".into(),
            line: 1,
        });
        let warnings = diags.into_phase_result("doclets").unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn downgrade_moves_errors_to_warnings() {
        let mut diags = Diagnostics::new();
        diags.error(Diagnostic::UnknownWord {
            word: "teh".into(),
            line: 2,
            text: "teh cat".into(),
        });
        diags.downgrade_errors();
        assert!(!diags.has_errors());
        assert_eq!(diags.warnings.len(), 1);
    }
}
