//! Progress reporting for extraction runs
//!
//! External tools give no byte-level progress, so reporting is per stage:
//! which file is being handled, which extractor was picked and how it ended.

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

/// A trait for reporting progress during extraction
pub trait ProgressReporter {
    /// Called once the source's type is known, also for nested layers
    fn on_start(&self, source: &Path, mimetype: &str);

    /// Called right before a strategy runs
    fn on_extractor(&self, name: &str);

    /// Called when extraction finishes, successfully or not
    fn on_finish(&self, message: &str);
}

/// A no-op progress reporter
#[derive(Debug, Default)]
pub struct NoProgressReporter;

impl ProgressReporter for NoProgressReporter {
    fn on_start(&self, _source: &Path, _mimetype: &str) {}
    fn on_extractor(&self, _name: &str) {}
    fn on_finish(&self, _message: &str) {}
}

/// Progress reporter using an indicatif spinner
#[cfg(feature = "progress")]
#[derive(Debug)]
pub struct IndicatifProgressReporter {
    progress_bar: ProgressBar,
}

#[cfg(feature = "progress")]
impl IndicatifProgressReporter {
    /// Create a new indicatif progress reporter
    pub fn new(progress_bar: ProgressBar) -> Self {
        Self { progress_bar }
    }

    /// Create a new indicatif progress reporter with default styling
    pub fn with_default_style() -> Self {
        let progress_bar = ProgressBar::new_spinner();
        progress_bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg} {prefix:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { progress_bar }
    }
}

#[cfg(feature = "progress")]
impl ProgressReporter for IndicatifProgressReporter {
    fn on_start(&self, source: &Path, mimetype: &str) {
        let name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.progress_bar.reset();
        self.progress_bar.set_message(format!("{name} ({mimetype})"));
        self.progress_bar
            .enable_steady_tick(std::time::Duration::from_millis(100));
    }

    fn on_extractor(&self, name: &str) {
        self.progress_bar.set_prefix(name.to_owned());
        self.progress_bar.tick();
    }

    fn on_finish(&self, message: &str) {
        self.progress_bar.finish_with_message(message.to_string());
    }
}
