//! Conversion results.

use crate::config::Template;
use crate::error::Diagnostic;
use crate::pipeline::doclet::ResourceRequest;
use serde::Serialize;
use std::path::PathBuf;

/// In-memory result of [`crate::convert::convert_to_latex`].
#[derive(Debug, Clone, Serialize)]
pub struct LatexDocument {
    /// Complete `.tex` source.
    pub tex: String,
    /// Cleaned `.bib` body (may be empty).
    pub bibtex: String,
    /// Template actually used, after front-matter override.
    pub template: Template,
    /// Figures to fetch before compiling.
    pub resources: Vec<ResourceRequest>,
    /// Warnings from every phase, in phase order.
    pub warnings: Vec<Diagnostic>,
    pub word_count: usize,
    pub stats: ConversionStats,
}

/// Result of a full [`crate::convert::convert`] run.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    pub tex_path: PathBuf,
    pub bib_path: PathBuf,
    /// `None` when compilation was disabled.
    pub pdf_path: Option<PathBuf>,
    pub template: Template,
    pub word_count: usize,
    pub warnings: Vec<Diagnostic>,
    pub stats: ConversionStats,
}

/// Counters and timings for one conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionStats {
    pub doclets: usize,
    /// In-document and bibliography labels together.
    pub labels: usize,
    pub bibliography_entries: usize,
    /// Bibliography citations in the rendered document.
    pub citations: usize,
    pub resources: usize,
    pub compile_steps: usize,
    pub latex_duration_ms: u64,
    pub compile_duration_ms: u64,
    pub total_duration_ms: u64,
}
