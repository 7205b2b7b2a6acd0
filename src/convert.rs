//! Conversion entry points.
//!
//! A conversion is a fixed sequence of phases. Each phase collects its
//! diagnostics into a fresh [`Diagnostics`] accumulator; at the phase
//! boundary the warnings are kept and any error ends the run with
//! [`Md2LatexError::PhaseFailed`]. Later phases therefore never see a
//! structurally broken document.
//!
//! ```text
//! bibtex ─▶ sections ─▶ doclets ─▶ labels ─▶ spellcheck ─▶ latex ─▶ resources ─▶ compile
//! ```
//!
//! [`convert_to_latex`] runs everything up to `latex` in memory;
//! [`convert`] adds the file writes, the resource fetches and the compiler.

use crate::config::ConversionConfig;
use crate::error::{Diagnostic, Diagnostics, Md2LatexError};
use crate::output::{ConversionOutput, ConversionStats, LatexDocument};
use crate::pipeline::doclet::{self, BuildOptions, DocletKind};
use crate::pipeline::inline::InlineContext;
use crate::pipeline::labels::LabelKind;
use crate::pipeline::template::{self, FrontMatter, Substitution};
use crate::pipeline::{bibliography, compile, render, resources, segment, spellcheck};
use crate::progress::{ConversionProgressCallback, NoopProgressCallback};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Bibliography citation commands as the citation resolver emits them.
static RE_CITE_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:autocite|cite)(?:\[[^\]]*\])*\{").unwrap());

/// Convert a Markdown file to `.tex`, `.bib` and (optionally) `.pdf`.
///
/// Output files are named after the input's file stem and written to
/// `config.output_dir`, or next to the input when unset.
///
/// # Errors
/// Any phase that ends with error diagnostics aborts the run with
/// [`Md2LatexError::PhaseFailed`]; I/O, bibliography and compiler failures
/// have their own variants. Nothing is written when a phase before `latex`
/// fails.
pub async fn convert(
    input: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Md2LatexError> {
    let total_start = Instant::now();
    let input = input.as_ref();
    info!("Starting conversion: {}", input.display());

    let markdown = read_input(input).await?;
    let source_dir = match input.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| Md2LatexError::InvalidConfig(format!("'{}' has no file name", input.display())))?;
    let output_dir = config.output_dir.clone().unwrap_or_else(|| source_dir.clone());

    let document = convert_to_latex(&markdown, &stem, &source_dir, config).await?;
    let mut phases = Phases::new(config);
    phases.warnings = document.warnings;
    let mut stats = document.stats;

    // ── Write .bib and .tex ──────────────────────────────────────────────
    tokio::fs::create_dir_all(&output_dir)
        .await
        .map_err(|source| Md2LatexError::OutputWriteFailed {
            path: output_dir.clone(),
            source,
        })?;
    let bib_path = output_dir.join(format!("{stem}.bib"));
    let tex_path = output_dir.join(format!("{stem}.tex"));
    write_atomic(&bib_path, &document.bibtex).await?;
    write_atomic(&tex_path, &document.tex).await?;
    info!("Wrote {} and {}", tex_path.display(), bib_path.display());

    // ── Fetch figures ────────────────────────────────────────────────────
    phases.start("resources");
    let mut diagnostics = Diagnostics::new();
    let assets = resources::fetch_all(&document.resources, config.download_timeout_secs, &mut diagnostics).await;
    phases.finish("resources", diagnostics)?;

    // ── Compile ──────────────────────────────────────────────────────────
    let pdf_path = if config.compile_pdf {
        phases.start("compile");
        let with_bibliography = !document.bibtex.trim().is_empty() && stats.citations > 0;
        if !with_bibliography {
            debug!("Document cites nothing, skipping the bibliography step");
        }
        let steps = compile::plan(
            &config.latex_engine,
            &stem,
            document.template.bibliography_backend(),
            with_bibliography,
        );
        stats.compile_steps = steps.len();

        let compile_start = Instant::now();
        let result = compile::compile(
            &steps,
            &output_dir,
            &stem,
            config.compile_timeout_secs,
            phases.progress,
        )
        .await;
        stats.compile_duration_ms = compile_start.elapsed().as_millis() as u64;

        let pdf = match result {
            Ok(pdf) => pdf,
            Err(e) => {
                phases.progress.on_phase_complete("compile", 1, 0);
                return Err(e);
            }
        };
        phases.progress.on_phase_complete("compile", 0, 0);

        if config.keep_work_files {
            debug!("Keeping work files in {}", output_dir.display());
        } else {
            compile::clean_up(&output_dir, &stem, &assets).await;
        }
        Some(pdf)
    } else {
        debug!("PDF compilation disabled");
        None
    };

    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    info!(
        "Conversion complete: {} doclets, {} labels, {} warnings, {}ms total",
        stats.doclets,
        stats.labels,
        phases.warnings.len(),
        stats.total_duration_ms
    );

    Ok(ConversionOutput {
        tex_path,
        bib_path,
        pdf_path,
        template: document.template,
        word_count: document.word_count,
        warnings: phases.warnings,
        stats,
    })
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Md2LatexError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Md2LatexError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input, config))
}

/// Run every phase up to `latex` on an in-memory document.
///
/// # Arguments
/// * `markdown`   — document text, bibliography entries included
/// * `name`       — base name of the output files; the template's
///   bibliography resource points at `<name>.bib`
/// * `source_dir` — directory local figures are resolved against
/// * `config`     — `bibliography_paths` are read from disk; nothing is written
pub async fn convert_to_latex(
    markdown: &str,
    name: &str,
    source_dir: &Path,
    config: &ConversionConfig,
) -> Result<LatexDocument, Md2LatexError> {
    let mut phases = Phases::new(config);
    let mut stats = ConversionStats::default();

    // ── bibtex: pull entries out of the body and the auxiliary files ────
    phases.start("bibtex");
    let (own_bib, rest) = bibliography::extract(markdown)?;
    let mut bib_labels = bibliography::extract_labels(markdown)?;
    let mut bibs = vec![own_bib];
    for (path, text) in read_bibliographies(&config.bibliography_paths).await? {
        let (bib, _) = bibliography::extract(&text)?;
        let labels = bibliography::extract_labels(&text)?;
        debug!("{}: {} entries", path.display(), labels.len());
        bibs.push(bib);
        bib_labels.extend(labels);
    }
    let bibtex = join_bibliographies(bibs);
    let body = bibliography::strip_bibliography_section(&rest);
    stats.bibliography_entries = bib_labels.len();
    phases.finish("bibtex", Diagnostics::new())?;

    // ── sections ─────────────────────────────────────────────────────────
    phases.start("sections");
    let segments = segment::segment(&body, segment::PatternSet::large(), 1);
    debug!("{} segments", segments.len());
    phases.finish("sections", Diagnostics::new())?;

    // ── doclets ──────────────────────────────────────────────────────────
    phases.start("doclets");
    let output_dir = config.output_dir.clone().unwrap_or_else(|| source_dir.to_path_buf());
    let built = doclet::build(
        &segments,
        &BuildOptions {
            source_dir: source_dir.to_path_buf(),
            output_dir,
            auto_label_caption: config.auto_label_caption,
        },
    );
    let mut diagnostics = built.diagnostics;
    let front_matter = built
        .doclets
        .iter()
        .find(|d| matches!(d.kind, DocletKind::Yaml))
        .map(|d| FrontMatter::parse(&d.content, d.line))
        .transpose()
        .unwrap_or_else(|diagnostic| {
            diagnostics.error(diagnostic);
            None
        })
        .unwrap_or_default();
    let template = match front_matter.template() {
        Some(chosen) => {
            let chosen = chosen?;
            if chosen != config.template {
                info!("Front matter selects template '{}'", chosen);
            }
            chosen
        }
        None => config.template,
    };
    stats.doclets = built.doclets.len();
    stats.resources = built.resources.len();
    phases.finish("doclets", diagnostics)?;

    // ── labels: merge bibliography keys into the registry ────────────────
    phases.start("labels");
    let mut registry = built.labels;
    let mut diagnostics = Diagnostics::new();
    for bib in &bib_labels {
        if let Err(diagnostic) = registry.register(&bib.label, LabelKind::Bibliography(bib.entry_type.clone()), bib.line) {
            diagnostics.error(diagnostic);
        }
    }
    stats.labels = registry.len();
    phases.finish("labels", diagnostics)?;

    // ── spellcheck ───────────────────────────────────────────────────────
    match (&config.spell_checker, config.skip_spellcheck) {
        (Some(checker), false) => {
            phases.start("spellcheck");
            let mut diagnostics = Diagnostics::new();
            let checked = spellcheck::check(&built.doclets, checker.as_ref(), &mut diagnostics);
            debug!("Spellchecked {} words", checked);
            if !config.spellcheck_fatal {
                diagnostics.downgrade_errors();
            }
            phases.finish("spellcheck", diagnostics)?;
        }
        (_, true) => debug!("Spellcheck skipped"),
        (None, false) => debug!("No spellchecker configured, spellcheck skipped"),
    }

    // ── latex ────────────────────────────────────────────────────────────
    phases.start("latex");
    let latex_start = Instant::now();
    let mut diagnostics = Diagnostics::new();
    let rendered = render::render(&built.doclets, &registry, template, &mut diagnostics)?;
    let source = template::load(template, config.template_dir.as_deref()).await?;
    let ctx = InlineContext {
        registry: &registry,
        template,
    };
    let sub = Substitution {
        front_matter: &front_matter,
        rendered: &rendered,
        bibliography: name,
    };
    let tex = template::substitute(&source, &sub, &ctx, &mut diagnostics)?;
    stats.citations = count_citations(&rendered.body) + count_citations(&rendered.appendix);
    stats.latex_duration_ms = latex_start.elapsed().as_millis() as u64;
    phases.finish("latex", diagnostics)?;

    Ok(LatexDocument {
        tex,
        bibtex,
        template,
        resources: built.resources,
        warnings: phases.warnings,
        word_count: spellcheck::word_count(&body),
        stats,
    })
}

/// Read the given bibliography files and return their cleaned entries.
///
/// Non-BibTeX text in the files is ignored.
pub async fn extract_bibtex(paths: &[PathBuf]) -> Result<String, Md2LatexError> {
    let mut bibs = Vec::with_capacity(paths.len());
    for (_, text) in read_bibliographies(paths).await? {
        let (bib, _) = bibliography::extract(&text)?;
        bibs.push(bib);
    }
    Ok(join_bibliographies(bibs))
}

/// Prose word count of a Markdown document, bibliography excluded.
pub fn word_count(markdown: &str) -> Result<usize, Md2LatexError> {
    let (_, rest) = bibliography::extract(markdown)?;
    Ok(spellcheck::word_count(&bibliography::strip_bibliography_section(&rest)))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Phase bookkeeping: progress events plus the warnings kept so far.
struct Phases<'a> {
    progress: &'a dyn ConversionProgressCallback,
    warnings: Vec<Diagnostic>,
}

impl<'a> Phases<'a> {
    fn new(config: &'a ConversionConfig) -> Self {
        Self {
            progress: config.progress_callback.as_deref().unwrap_or(&NoopProgressCallback),
            warnings: Vec::new(),
        }
    }

    fn start(&self, phase: &'static str) {
        debug!("Phase {} started", phase);
        self.progress.on_phase_start(phase);
    }

    fn finish(&mut self, phase: &'static str, diagnostics: Diagnostics) -> Result<(), Md2LatexError> {
        self.progress
            .on_phase_complete(phase, diagnostics.errors.len(), diagnostics.warnings.len());
        let warnings = diagnostics.into_phase_result(phase)?;
        self.warnings.extend(warnings);
        Ok(())
    }
}

async fn read_input(path: &Path) -> Result<String, Md2LatexError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(Md2LatexError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| Md2LatexError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })
}

async fn read_bibliographies(paths: &[PathBuf]) -> Result<Vec<(PathBuf, String)>, Md2LatexError> {
    let mut texts = Vec::with_capacity(paths.len());
    for path in paths {
        texts.push((path.clone(), read_input(path).await?));
    }
    Ok(texts)
}

fn join_bibliographies(bibs: Vec<String>) -> String {
    bibs.into_iter()
        .filter(|b| !b.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn count_citations(latex: &str) -> usize {
    RE_CITE_COMMAND.find_iter(latex).count()
}

/// Atomic write: write to a sibling temp file, then rename over `path`.
async fn write_atomic(path: &Path, contents: &str) -> Result<(), Md2LatexError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|source| Md2LatexError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| Md2LatexError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        })
}
