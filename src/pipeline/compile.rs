//! Compilation driver: `.tex` → `.pdf` with the external TeX toolchain.
//!
//! The classic four-step run:
//!
//! ```text
//! pdflatex ─▶ bibtex|biber ─▶ pdflatex ─▶ pdflatex
//! ```
//!
//! The bibliography step is left out when the document cites nothing, since
//! `bibtex` fails on a document without `\citation` entries.
//!
//! Each step runs in the output directory with stdin closed, its stdout and
//! stderr interleaved into one temporary log file, and a wall-clock timeout.
//! A step that runs past the timeout is killed and the run aborts.

use crate::config::BibliographyBackend;
use crate::error::Md2LatexError;
use crate::progress::ConversionProgressCallback;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Files LaTeX, BibTeX and Biber leave behind next to the `.tex`.
pub const LATEX_WORK_EXTENSIONS: &[&str] = &[
    ".aux", ".bbl", ".bcf", ".blg", ".lof", ".log", ".lot", ".out", ".run.xml", ".toc", ".synctex.gz",
];

/// Number of log lines kept when a step fails and no error line is found.
const LOG_TAIL_LINES: usize = 20;

/// One external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileStep {
    pub program: String,
    pub args: Vec<String>,
}

impl CompileStep {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Printable command line.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// The step list for `<stem>.tex`.
pub fn plan(engine: &str, stem: &str, backend: BibliographyBackend, with_bibliography: bool) -> Vec<CompileStep> {
    let tex = format!("{stem}.tex");
    let typeset = CompileStep::new(engine, ["-interaction=nonstopmode", "-halt-on-error", tex.as_str()]);
    let mut steps = vec![typeset.clone()];
    if with_bibliography {
        steps.push(CompileStep::new(backend.program(), [stem]));
    }
    steps.push(typeset.clone());
    steps.push(typeset);
    steps
}

/// Run `steps` in `work_dir` and return the produced `<stem>.pdf`.
///
/// Stale work files are removed first so an old `.aux` cannot poison the
/// run.
pub async fn compile(
    steps: &[CompileStep],
    work_dir: &Path,
    stem: &str,
    timeout_secs: u64,
    progress: &dyn ConversionProgressCallback,
) -> Result<PathBuf, Md2LatexError> {
    let removed = remove_work_files(work_dir, stem).await;
    if removed > 0 {
        debug!("removed {} stale work files", removed);
    }

    let total = steps.len();
    for (i, step) in steps.iter().enumerate() {
        progress.on_compile_step(i + 1, total, &step.command_line());
        run_step(step, i + 1, total, work_dir, timeout_secs).await?;
    }

    let pdf = work_dir.join(format!("{stem}.pdf"));
    if !tokio::fs::try_exists(&pdf).await.unwrap_or(false) {
        return Err(Md2LatexError::Internal(format!(
            "compilation finished but {} was not produced",
            pdf.display()
        )));
    }
    info!("Compiled {}", pdf.display());
    Ok(pdf)
}

/// Run one step under the wall-clock timeout.
pub async fn run_step(
    step: &CompileStep,
    index: usize,
    total: usize,
    work_dir: &Path,
    timeout_secs: u64,
) -> Result<(), Md2LatexError> {
    let command = step.command_line();
    info!("[{}/{}] {}", index, total, command);

    let log = tempfile::NamedTempFile::new()
        .map_err(|e| Md2LatexError::Internal(format!("tempfile: {e}")))?;
    let sink = |log: &tempfile::NamedTempFile| {
        log.reopen()
            .map(Stdio::from)
            .map_err(|e| Md2LatexError::Internal(format!("tempfile: {e}")))
    };

    let mut child = Command::new(&step.program)
        .args(&step.args)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(sink(&log)?)
        .stderr(sink(&log)?)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Md2LatexError::ToolNotFound {
                program: step.program.clone(),
            },
            _ => Md2LatexError::Internal(format!("failed to start '{command}': {e}")),
        })?;

    let status = match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(waited) => waited.map_err(|e| Md2LatexError::Internal(format!("waiting for '{command}': {e}")))?,
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!("could not kill '{}': {}", command, e);
            }
            return Err(Md2LatexError::CompileTimeout {
                step: index,
                total,
                command,
                secs: timeout_secs,
            });
        }
    };

    if !status.success() {
        let raw = tokio::fs::read(log.path()).await.unwrap_or_default();
        return Err(Md2LatexError::CompileFailed {
            step: index,
            total,
            command,
            status: status.code().unwrap_or(-1),
            log: meaningful_log(&String::from_utf8_lossy(&raw)),
        });
    }
    Ok(())
}

/// TeX error lines (`! ...` and the `l.N` context after them), or the tail
/// of the log when there are none.
fn meaningful_log(log: &str) -> String {
    let lines: Vec<&str> = log.lines().map(str::trim_end).collect();
    let errors: Vec<&str> = lines
        .iter()
        .enumerate()
        .filter(|(i, l)| {
            l.starts_with('!')
                || l.starts_with("l.")
                || l.starts_with("ERROR")
                || (*i > 0 && lines[i - 1].starts_with('!') && !l.is_empty())
        })
        .map(|(_, l)| *l)
        .collect();
    if !errors.is_empty() {
        return errors.join("\n");
    }
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    lines[start..].join("\n")
}

/// Delete `<stem><ext>` for every work-file extension. Returns how many
/// files were removed.
pub async fn remove_work_files(dir: &Path, stem: &str) -> usize {
    let mut removed = 0;
    for ext in LATEX_WORK_EXTENSIONS {
        let path = dir.join(format!("{stem}{ext}"));
        if tokio::fs::remove_file(&path).await.is_ok() {
            removed += 1;
        }
    }
    removed
}

/// Remove work files and fetched figures after a successful run.
pub async fn clean_up(dir: &Path, stem: &str, assets: &[PathBuf]) {
    let mut removed = remove_work_files(dir, stem).await;
    for asset in assets {
        match tokio::fs::remove_file(asset).await {
            Ok(()) => removed += 1,
            Err(e) => debug!("could not remove {}: {}", asset.display(), e),
        }
    }
    debug!("cleaned up {} files", removed);
}
