//! # md2latex
//!
//! Convert author-annotated Markdown, with an embedded BibTeX bibliography
//! and inline `<label>` citations, into validated LaTeX and PDF.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Markdown
//!  │
//!  ├─ 1. bibtex      pull BibTeX entries out of the body → <name>.bib
//!  ├─ 2. sections    split the body into typed segments
//!  ├─ 3. doclets     captions, labels, headers, figures, appendix flag
//!  ├─ 4. labels      merge bibliography keys into the label registry
//!  ├─ 5. spellcheck  pluggable checker over prose only
//!  ├─ 6. latex       render doclets, resolve citations, fill the template
//!  ├─ 7. resources   download / copy referenced figures
//!  └─ 8. compile     pdflatex → bibtex|biber → pdflatex → pdflatex
//! ```
//!
//! Every phase collects placed [`Diagnostic`]s. Warnings are reported; any
//! error stops the run at the end of its phase, so the renderer never sees a
//! structurally broken document.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use md2latex::{convert, ConversionConfig, Template};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder()
//!         .template(Template::Ieee)
//!         .build()?;
//!     let output = convert("paper.md", &config).await?;
//!     println!("{}", output.tex_path.display());
//!     for warning in &output.warnings {
//!         eprintln!("warning: {warning}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `md2latex` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! md2latex = { version = "0.3", default-features = false }
//! ```
//!
//! ## Templates
//!
//! | Template | Citation | Pages | Bibliography |
//! |----------|----------|-------|--------------|
//! | `default` | `\autocite` | as written | biblatex + biber |
//! | `chicago` | `\autocite` | as written | biblatex-chicago + biber |
//! | `ieee`    | `\cite`     | `p.` / `pp.` | IEEEtran + bibtex |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{BibliographyBackend, ConversionConfig, ConversionConfigBuilder, Template};
pub use convert::{convert, convert_sync, convert_to_latex, extract_bibtex, word_count};
pub use error::{Diagnostic, Diagnostics, Md2LatexError};
pub use output::{ConversionOutput, ConversionStats, LatexDocument};
pub use pipeline::spellcheck::{SpellChecker, SpellReport, WordListSpellChecker};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
