//! Pipeline stages for Markdown-to-LaTeX conversion.
//!
//! Each submodule implements one transformation step and is testable on its
//! own; [`crate::convert`] strings them together into phases.
//!
//! ## Data Flow
//!
//! ```text
//! markdown ──▶ bibliography ──▶ segment ──▶ doclet ──▶ labels
//!                 (.bib)                                  │
//!                                   ┌─────────────────────┤
//!                                   ▼                     ▼
//!                              spellcheck       render (inline, list, citation)
//!                                                         │
//!                                  template ◀─────────────┘
//!                                     │
//!                                     ▼
//!                     postprocess ──▶ resources ──▶ compile
//! ```
//!
//! 1. [`bibliography`] — pull BibTeX entries out of the text, escape values
//! 2. [`segment`]      — partition the body into typed segments
//! 3. [`doclet`]       — annotations, labels, appendix flag, figure requests
//! 4. [`labels`]       — case-insensitive label registry
//! 5. [`spellcheck`]   — prose extraction and the pluggable checker
//! 6. [`render`]       — doclets to LaTeX; [`inline`], [`list`] and
//!    [`citation`] handle the prose inside them
//! 7. [`template`]     — front matter and placeholder substitution, then
//!    [`postprocess`] cleanup
//! 8. [`resources`]    — figure downloads and copies; the only network I/O
//! 9. [`compile`]      — the external TeX toolchain
//!
//! [`splice`] is the shared back-to-front span replacement used by the
//! rewriting stages.

pub mod bibliography;
pub mod citation;
pub mod compile;
pub mod doclet;
pub mod inline;
pub mod labels;
pub mod list;
pub mod postprocess;
pub mod render;
pub mod resources;
pub mod segment;
pub mod spellcheck;
pub mod splice;
pub mod template;
