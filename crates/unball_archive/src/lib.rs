//! Content-sniffing archive extraction with atomic, non-clobbering output
//!
//! Hand this crate a file and it works out what the file is, picks the best
//! extraction tool available on this system and unpacks it so that exactly
//! one new entry appears at the destination.
//!
//! # Features
//!
//! - Type detection by content, with file-extension fallback
//! - Dozens of formats through external tools, with in-process fallbacks
//!   for zip, tar, gzip, bzip2, xz, zstd, 7z, uuencode, base64 and BinHex
//! - Staged extraction published by a single rename; existing paths are
//!   never overwritten and the source is never touched
//! - Transparent unwrapping of nested single-file layers such as `.tar.gz`
//! - Progress reporting via `indicatif`
//! - Both sync and async APIs
//!
//! # Examples
//!
//! ## Basic extraction
//!
//! ```no_run
//! use unball_archive::ExtractorBuilder;
//! use std::path::Path;
//!
//! let extractor = ExtractorBuilder::new().build()?;
//!
//! let published = extractor.extract(
//!     Path::new("archive.tar.gz"),
//!     Some(Path::new("output_dir")),
//! )?;
//! println!("extracted to {}", published.display());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Checking the format tables
//!
//! ```
//! let report = unball_archive::self_test()?;
//! assert!(report.is_clean(), "{report}");
//! # Ok::<(), unball_archive::ExtractError>(())
//! ```
//!
//! ## With progress reporting
//!
//! ```no_run
//! use unball_archive::ExtractorBuilder;
//! use std::path::Path;
//! # #[cfg(feature = "progress")]
//! use indicatif::ProgressBar;
//!
//! # #[cfg(feature = "progress")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let extractor = ExtractorBuilder::new()
//!     .with_progress_bar(ProgressBar::new_spinner())
//!     .build()?;
//!
//! extractor.extract(Path::new("archive.zip"), None)?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "progress"))]
//! # fn main() {}
//! ```

use std::path::{Path, PathBuf};

pub mod error;
pub mod extractor;
pub mod mimetype;
pub mod progress;
pub mod registry;
pub mod staging;
pub mod strategy;
pub mod table;

#[cfg(feature = "tokio")]
pub mod r#async;

pub use error::{ExtractError, Result};
pub use extractor::{Extractor, ExtractorBuilder};
pub use mimetype::{ResolvedType, TypeResolver};
pub use progress::{NoProgressReporter, ProgressReporter};
pub use registry::{Registry, SelfTestReport};
pub use strategy::{InvokeOptions, Strategy};

#[cfg(feature = "progress")]
pub use progress::IndicatifProgressReporter;

#[cfg(feature = "tokio")]
pub use r#async::AsyncExtractor;

/// Extract `source` with default settings. See [`Extractor::extract`].
pub fn extract(source: &Path, target: Option<&Path>) -> Result<PathBuf> {
    ExtractorBuilder::new().build()?.extract(source, target)
}

/// Check the built-in tables for consistency
pub fn self_test() -> Result<SelfTestReport> {
    Ok(Registry::builtin()?.self_test())
}
