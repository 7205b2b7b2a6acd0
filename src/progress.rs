//! Progress-callback trait for per-phase conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves from one phase to the next.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal spinner, a log file or an editor
//! status bar without the library knowing how the host application
//! communicates.
//!
//! # Example
//!
//! ```rust
//! use md2latex::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     phases: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_phase_complete(&self, phase: &str, errors: usize, warnings: usize) {
//!         self.phases.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{phase}: {errors} errors, {warnings} warnings");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { phases: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline at phase boundaries.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Phases run sequentially, so calls never overlap.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called before a phase starts.
    ///
    /// # Arguments
    /// * `phase` — phase name (`bibtex`, `sections`, `doclets`, `labels`,
    ///   `spellcheck`, `latex`, `resources`, `compile`)
    fn on_phase_start(&self, phase: &str) {
        let _ = phase;
    }

    /// Called after a phase, with the number of diagnostics it produced.
    ///
    /// A phase reporting `errors > 0` is the last one of the run.
    fn on_phase_complete(&self, phase: &str, errors: usize, warnings: usize) {
        let _ = (phase, errors, warnings);
    }

    /// Called just before an external compiler step is spawned.
    ///
    /// # Arguments
    /// * `step`    — 1-indexed step number
    /// * `total`   — number of steps (4)
    /// * `command` — the command line about to run
    fn on_compile_step(&self, step: usize, total: usize, command: &str) {
        let _ = (step, total, command);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        started: Mutex<Vec<String>>,
        errors: AtomicUsize,
        steps: AtomicUsize,
    }

    impl ConversionProgressCallback for TrackingCallback {
        fn on_phase_start(&self, phase: &str) {
            self.started.lock().unwrap().push(phase.to_string());
        }

        fn on_phase_complete(&self, _phase: &str, errors: usize, _warnings: usize) {
            self.errors.fetch_add(errors, Ordering::SeqCst);
        }

        fn on_compile_step(&self, _step: usize, _total: usize, _command: &str) {
            self.steps.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_phase_start("sections");
        cb.on_phase_complete("sections", 0, 2);
        cb.on_compile_step(1, 4, "pdflatex paper");
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_phase_start("bibtex");
        tracker.on_phase_complete("bibtex", 0, 0);
        tracker.on_phase_start("doclets");
        tracker.on_phase_complete("doclets", 2, 1);
        for step in 1..=4 {
            tracker.on_compile_step(step, 4, "pdflatex x");
        }

        assert_eq!(*tracker.started.lock().unwrap(), vec!["bibtex", "doclets"]);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.steps.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn ConversionProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_phase_start("latex");
        cb.on_phase_complete("latex", 0, 0);
    }
}
