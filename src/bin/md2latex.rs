//! CLI binary for md2latex.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use md2latex::{
    convert, extract_bibtex, word_count, ConversionConfig, ConversionOutput, ConversionProgressCallback,
    ProgressCallback, Template, WordListSpellChecker,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner naming the running phase, plus one
/// log line per finished phase.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start of the running phase, for elapsed reporting.
    phase_start: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            phase_start: Mutex::new(None),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_phase_start(&self, phase: &str) {
        if let Ok(mut start) = self.phase_start.lock() {
            *start = Some(Instant::now());
        }
        self.bar.set_prefix(phase.to_string());
        self.bar.set_message("");
    }

    fn on_phase_complete(&self, phase: &str, errors: usize, warnings: usize) {
        let elapsed_ms = self
            .phase_start
            .lock()
            .ok()
            .and_then(|mut start| start.take())
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        let mark = if errors > 0 {
            red("✗")
        } else if warnings > 0 {
            yellow("⚠")
        } else {
            green("✓")
        };
        let counts = match (errors, warnings) {
            (0, 0) => String::new(),
            (0, w) => yellow(&format!("{w} warnings")),
            (e, w) => red(&format!("{e} errors, {w} warnings")),
        };
        self.bar.println(format!(
            "  {} {:<11} {}  {}",
            mark,
            phase,
            counts,
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_compile_step(&self, step: usize, total: usize, command: &str) {
        self.bar.set_message(format!("[{step}/{total}] {command}"));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert and compile (writes paper.bib, paper.tex, paper.pdf next to paper.md)
  md2latex paper.md

  # IEEE conference style, extra bibliography, output in build/
  md2latex -t ieee -b refs.bib -o build paper.md

  # LaTeX only, no TeX installation needed
  md2latex --no-pdf paper.md

  # Spellcheck against a word list and fail on likely misspellings
  md2latex --dictionary words.txt --spellcheck-fatal paper.md

  # Prose word count
  md2latex --word-count paper.md

  # Only extract the cleaned bibliography
  md2latex --bibtex-only -b extra.bib paper.md

CITATIONS:
  <label>                       bibliography entry or in-document label
  <label, 10-12>                page range (ieee prints pp. 10-12)
  <label, 3, 18:00>             chapter and timestamp
  <label, s4>                   section marker

ENVIRONMENT VARIABLES:
  MD2LATEX_TEMPLATE         default, chicago or ieee
  MD2LATEX_TEMPLATE_DIR     directory with <template>.tex overrides
  MD2LATEX_OUTPUT_DIR       output directory
  MD2LATEX_DICTIONARY       word list for the spellchecker
  MD2LATEX_LATEX_ENGINE     typesetting engine (default: pdflatex)
  RUST_LOG                  log filter, overrides --verbose / --quiet
"#;

/// Convert annotated Markdown to LaTeX and PDF.
#[derive(Parser, Debug)]
#[command(
    name = "md2latex",
    version,
    about = "Convert annotated Markdown with an embedded bibliography to LaTeX and PDF",
    long_about = "Convert an author-annotated Markdown document, with BibTeX entries embedded \
in the text and <label> citations, into a validated LaTeX document and compile it to PDF. \
Missing captions and labels, unresolved citations and naked URLs are reported with line numbers.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Markdown file to convert.
    input: PathBuf,

    /// Additional BibTeX file (repeatable).
    #[arg(short, long = "bibliography", value_name = "FILE")]
    bibliography: Vec<PathBuf>,

    /// Directory for .tex, .bib, .pdf and figures. Default: next to the input.
    #[arg(short, long, env = "MD2LATEX_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Document template.
    #[arg(short, long, env = "MD2LATEX_TEMPLATE", value_enum, default_value = "default")]
    template: TemplateArg,

    /// Directory with <template>.tex files that replace the built-ins.
    #[arg(long, env = "MD2LATEX_TEMPLATE_DIR")]
    template_dir: Option<PathBuf>,

    /// Word list (one word per line) for spellchecking.
    #[arg(long, env = "MD2LATEX_DICTIONARY")]
    dictionary: Option<PathBuf>,

    /// Treat likely misspellings as errors.
    #[arg(long, env = "MD2LATEX_SPELLCHECK_FATAL", conflicts_with = "skip_spellcheck")]
    spellcheck_fatal: bool,

    /// Do not spellcheck.
    #[arg(long, env = "MD2LATEX_SKIP_SPELLCHECK")]
    skip_spellcheck: bool,

    /// Synthesise missing captions and labels instead of failing.
    #[arg(long, env = "MD2LATEX_AUTO_LABEL_CAPTION")]
    auto_label_caption: bool,

    /// Print the prose word count and exit.
    #[arg(long, conflicts_with = "bibtex_only")]
    word_count: bool,

    /// Write only the cleaned .bib and exit.
    #[arg(long)]
    bibtex_only: bool,

    /// Stop after writing .tex and .bib.
    #[arg(long, env = "MD2LATEX_NO_PDF")]
    no_pdf: bool,

    /// Keep LaTeX work files and fetched figures after compiling.
    #[arg(long, env = "MD2LATEX_KEEP_WORK_FILES")]
    keep_work_files: bool,

    /// Typesetting engine.
    #[arg(long, env = "MD2LATEX_LATEX_ENGINE", default_value = "pdflatex")]
    latex_engine: String,

    /// Per-step compiler timeout in seconds.
    #[arg(long, env = "MD2LATEX_COMPILE_TIMEOUT", default_value_t = 60)]
    compile_timeout: u64,

    /// Per-figure download timeout in seconds.
    #[arg(long, env = "MD2LATEX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output structured JSON (ConversionOutput) on stdout.
    #[arg(long, env = "MD2LATEX_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "MD2LATEX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MD2LATEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MD2LATEX_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum TemplateArg {
    Default,
    Chicago,
    Ieee,
}

impl From<TemplateArg> for Template {
    fn from(v: TemplateArg) -> Self {
        match v {
            TemplateArg::Default => Template::Default,
            TemplateArg::Chicago => Template::Chicago,
            TemplateArg::Ieee => Template::Ieee,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner already reports each phase, so library INFO logs are
    // muted while it runs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Word-count mode ──────────────────────────────────────────────────
    if cli.word_count {
        let markdown = tokio::fs::read_to_string(&cli.input)
            .await
            .with_context(|| format!("Failed to read {}", cli.input.display()))?;
        let words = word_count(&markdown).context("Failed to count words")?;
        if cli.json {
            println!("{}", serde_json::json!({ "word_count": words }));
        } else {
            println!("{words}");
        }
        return Ok(());
    }

    // ── Bibliography-only mode ───────────────────────────────────────────
    if cli.bibtex_only {
        let mut sources = vec![cli.input.clone()];
        sources.extend(cli.bibliography.iter().cloned());
        let bib = extract_bibtex(&sources).await.context("BibTeX extraction failed")?;

        let dir = output_dir_for(&cli);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let bib_path = dir.join(format!("{}.bib", stem_of(&cli.input)?));
        tokio::fs::write(&bib_path, &bib)
            .await
            .with_context(|| format!("Failed to write {}", bib_path.display()))?;

        if !cli.quiet {
            eprintln!("{}  {}", green("✔"), bold(&bib_path.display().to_string()));
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let callback = progress
        .as_ref()
        .map(|cb| Arc::clone(cb) as ProgressCallback);
    let config = build_config(&cli, callback)?;

    // ── Run conversion ───────────────────────────────────────────────────
    let result = convert(&cli.input, &config).await;
    if let Some(ref cb) = progress {
        cb.finish();
    }
    let output = result.context("Conversion failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&output, show_progress);
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .bibliographies(cli.bibliography.iter().cloned())
        .template(cli.template.into())
        .skip_spellcheck(cli.skip_spellcheck)
        .spellcheck_fatal(cli.spellcheck_fatal)
        .auto_label_caption(cli.auto_label_caption)
        .compile_pdf(!cli.no_pdf)
        .keep_work_files(cli.keep_work_files)
        .compile_timeout_secs(cli.compile_timeout)
        .download_timeout_secs(cli.download_timeout)
        .latex_engine(cli.latex_engine.clone());

    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_dir(dir);
    }
    if let Some(ref dir) = cli.template_dir {
        builder = builder.template_dir(dir);
    }
    if let Some(ref path) = cli.dictionary {
        if !cli.skip_spellcheck {
            let checker = WordListSpellChecker::from_path(path)
                .with_context(|| format!("Failed to load dictionary {}", path.display()))?;
            builder = builder.spell_checker(Arc::new(checker));
        }
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn output_dir_for(cli: &Cli) -> PathBuf {
    match (&cli.output_dir, cli.input.parent()) {
        (Some(dir), _) => dir.clone(),
        (None, Some(parent)) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn stem_of(input: &Path) -> Result<String> {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .with_context(|| format!("'{}' has no file name", input.display()))
}

fn print_summary(output: &ConversionOutput, show_progress: bool) {
    // Library logs are muted under the spinner, so the warnings are listed here.
    if show_progress {
        for warning in &output.warnings {
            eprintln!("  {} {}", yellow("⚠"), warning);
        }
    }

    let produced = output.pdf_path.as_ref().unwrap_or(&output.tex_path);
    eprintln!(
        "{}  {}  {}",
        if output.warnings.is_empty() {
            green("✔")
        } else {
            yellow("⚠")
        },
        bold(&produced.display().to_string()),
        dim(&format!("{}ms", output.stats.total_duration_ms)),
    );
    eprintln!(
        "   {} words  /  {} citations  /  {} labels  /  {} warnings  —  template {}",
        output.word_count,
        output.stats.citations,
        output.stats.labels,
        output.warnings.len(),
        output.template,
    );
}
