//! Configuration types for Markdown-to-LaTeX conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Every knob lives in one struct so a
//! config can be shared across tasks, logged, and compared between two runs.
//!
//! # Builder over constructor
//! Most callers only care about two or three fields (output directory,
//! template, maybe `compile_pdf`). The builder lets them set those and rely on
//! documented defaults for the rest.

use crate::error::Md2LatexError;
use crate::pipeline::spellcheck::SpellChecker;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Configuration for a Markdown-to-LaTeX conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use md2latex::{ConversionConfig, Template};
///
/// let config = ConversionConfig::builder()
///     .template(Template::Ieee)
///     .compile_pdf(false)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Directory receiving `<name>.bib`, `<name>.tex`, `<name>.pdf` and the
    /// fetched figures. `None` means "next to the Markdown file".
    pub output_dir: Option<PathBuf>,

    /// Auxiliary bibliography files merged with the entries embedded in the
    /// Markdown document.
    pub bibliography_paths: Vec<PathBuf>,

    /// Document style. Default: [`Template::Default`].
    ///
    /// A `template:` key in the front matter overrides this value.
    pub template: Template,

    /// Directory holding `default.tex`, `chicago.tex`, `ieee.tex` overrides.
    /// Templates missing from it fall back to the built-in ones.
    pub template_dir: Option<PathBuf>,

    /// Skip the spellcheck phase entirely. Default: false.
    pub skip_spellcheck: bool,

    /// Treat spellcheck errors as fatal. Default: false (errors are downgraded
    /// to warnings).
    pub spellcheck_fatal: bool,

    /// Synthesize missing labels and captions instead of failing. Default: false.
    ///
    /// Useful while drafting; the synthesized values are reported as warnings
    /// so they are not forgotten before submission.
    pub auto_label_caption: bool,

    /// Run the TeX toolchain after writing the `.tex`. Default: true.
    pub compile_pdf: bool,

    /// Keep `.aux`, `.log`, `.bbl`... and fetched figures after a successful
    /// compile. Default: false.
    pub keep_work_files: bool,

    /// Wall-clock limit per compiler step in seconds. Default: 60.
    ///
    /// A broken document can make `pdflatex` wait forever on stdin for a
    /// missing file; the timeout guarantees the run ends.
    pub compile_timeout_secs: u64,

    /// Per-download timeout for remote figures in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Typesetting engine run for steps 1, 3 and 4. Default: `pdflatex`.
    pub latex_engine: String,

    /// Spellchecker collaborator. `None` skips the spellcheck phase with a
    /// debug log, same as `skip_spellcheck`.
    pub spell_checker: Option<Arc<dyn SpellChecker>>,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            bibliography_paths: Vec::new(),
            template: Template::default(),
            template_dir: None,
            skip_spellcheck: false,
            spellcheck_fatal: false,
            auto_label_caption: false,
            compile_pdf: true,
            keep_work_files: false,
            compile_timeout_secs: 60,
            download_timeout_secs: 120,
            latex_engine: "pdflatex".to_string(),
            spell_checker: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("output_dir", &self.output_dir)
            .field("bibliography_paths", &self.bibliography_paths)
            .field("template", &self.template)
            .field("template_dir", &self.template_dir)
            .field("skip_spellcheck", &self.skip_spellcheck)
            .field("spellcheck_fatal", &self.spellcheck_fatal)
            .field("auto_label_caption", &self.auto_label_caption)
            .field("compile_pdf", &self.compile_pdf)
            .field("keep_work_files", &self.keep_work_files)
            .field("compile_timeout_secs", &self.compile_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("latex_engine", &self.latex_engine)
            .field(
                "spell_checker",
                &self.spell_checker.as_ref().map(|_| "<dyn SpellChecker>"),
            )
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn bibliography(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.bibliography_paths.push(path.into());
        self
    }

    pub fn bibliographies<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.config
            .bibliography_paths
            .extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn template(mut self, template: Template) -> Self {
        self.config.template = template;
        self
    }

    pub fn template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.template_dir = Some(dir.into());
        self
    }

    pub fn skip_spellcheck(mut self, v: bool) -> Self {
        self.config.skip_spellcheck = v;
        self
    }

    pub fn spellcheck_fatal(mut self, v: bool) -> Self {
        self.config.spellcheck_fatal = v;
        self
    }

    pub fn auto_label_caption(mut self, v: bool) -> Self {
        self.config.auto_label_caption = v;
        self
    }

    pub fn compile_pdf(mut self, v: bool) -> Self {
        self.config.compile_pdf = v;
        self
    }

    pub fn keep_work_files(mut self, v: bool) -> Self {
        self.config.keep_work_files = v;
        self
    }

    pub fn compile_timeout_secs(mut self, secs: u64) -> Self {
        self.config.compile_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn latex_engine(mut self, engine: impl Into<String>) -> Self {
        self.config.latex_engine = engine.into();
        self
    }

    pub fn spell_checker(mut self, checker: Arc<dyn SpellChecker>) -> Self {
        self.config.spell_checker = Some(checker);
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Md2LatexError> {
        let c = &self.config;
        if c.latex_engine.trim().is_empty() {
            return Err(Md2LatexError::InvalidConfig(
                "LaTeX engine must not be empty".into(),
            ));
        }
        if c.skip_spellcheck && c.spellcheck_fatal {
            return Err(Md2LatexError::InvalidConfig(
                "--skip-spellcheck and --spellcheck-fatal are mutually exclusive".into(),
            ));
        }
        if let Some(dir) = &c.template_dir {
            if !dir.is_dir() {
                return Err(Md2LatexError::InvalidConfig(format!(
                    "template directory '{}' does not exist",
                    dir.display()
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Templates ────────────────────────────────────────────────────────────

/// Named document style.
///
/// Each template fixes a handful of conventions besides its LaTeX preamble:
///
/// | Template | Citation | Pages | Figure width | Bibliography |
/// |----------|----------|-------|--------------|--------------|
/// | default | `\autocite` | as written | `0.66\textwidth` | biber |
/// | chicago | `\autocite` | as written | `0.66\textwidth` | biber |
/// | ieee | `\cite` | `p.` / `pp.` | `\linewidth` | bibtex |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Template {
    #[default]
    Default,
    Chicago,
    Ieee,
}

/// Bibliography processor run in compile step 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BibliographyBackend {
    Bibtex,
    Biber,
}

impl BibliographyBackend {
    pub fn program(self) -> &'static str {
        match self {
            BibliographyBackend::Bibtex => "bibtex",
            BibliographyBackend::Biber => "biber",
        }
    }
}

impl Template {
    pub const ALL: [Template; 3] = [Template::Default, Template::Chicago, Template::Ieee];

    pub fn name(self) -> &'static str {
        match self {
            Template::Default => "default",
            Template::Chicago => "chicago",
            Template::Ieee => "ieee",
        }
    }

    /// Citation command used for bibliography references.
    pub fn cite_command(self) -> &'static str {
        match self {
            Template::Ieee => "cite",
            Template::Default | Template::Chicago => "autocite",
        }
    }

    /// Whether page qualifiers get a `p.`/`pp.` prefix.
    pub fn uses_page_prefix(self) -> bool {
        matches!(self, Template::Ieee)
    }

    pub fn figure_width(self) -> &'static str {
        match self {
            Template::Ieee => "\\linewidth",
            Template::Default | Template::Chicago => "0.66\\textwidth",
        }
    }

    pub fn bibliography_backend(self) -> BibliographyBackend {
        match self {
            Template::Ieee => BibliographyBackend::Bibtex,
            Template::Default | Template::Chicago => BibliographyBackend::Biber,
        }
    }

    /// File name of the template inside a template directory.
    pub fn file_name(self) -> String {
        format!("{}.tex", self.name())
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Template {
    type Err = Md2LatexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Template::Default),
            "chicago" => Ok(Template::Chicago),
            "ieee" => Ok(Template::Ieee),
            _ => Err(Md2LatexError::UnknownTemplate {
                name: s.to_string(),
            }),
        }
    }
}
