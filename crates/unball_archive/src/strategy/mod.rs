//! The uniform extractor interface
//!
//! Every way of unpacking something, whether an external program, an
//! in-process decoder or a trial run over several of those, implements
//! [`Strategy`]. The orchestrator only ever sees `Arc<dyn Strategy>`.

pub mod builtin;
pub mod codec;
pub mod command;
pub mod try_all;

use std::fmt::Debug;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::Result;

pub use builtin::{Builtin, BuiltinExtractor};
pub use command::{CommandExtractor, NamedOutputExtractor, PipeExtractor, StuffitExtractor};
pub use try_all::TryAll;

/// Options passed down to every extraction attempt
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Let external tools write to our stdout/stderr instead of discarding it
    pub verbose: bool,
    /// Kill external tools that run longer than this
    pub timeout: Option<Duration>,
}

/// Something that can expand an archive into a directory
pub trait Strategy: Debug + Send + Sync {
    /// Short human-readable name, usually the program being run
    fn name(&self) -> String;

    /// Whether the tool or library this strategy needs is usable on this host
    fn is_viable(&self) -> bool;

    /// Extract `source` into the existing directory `target`.
    ///
    /// Implementations must leave `source` untouched and must not write
    /// anywhere outside `target`.
    fn extract(&self, source: &Path, target: &Path, options: &InvokeOptions) -> Result<()>;
}

/// Remembers a positive viability check for the rest of the run.
///
/// Negative results are re-checked every time; a tool may be installed
/// while we are running.
#[derive(Debug, Default)]
pub(crate) struct ViabilityCache(AtomicBool);

impl ViabilityCache {
    pub(crate) fn check(&self, probe: impl FnOnce() -> bool) -> bool {
        if self.0.load(Ordering::Relaxed) {
            return true;
        }
        let viable = probe();
        if viable {
            self.0.store(true, Ordering::Relaxed);
        }
        viable
    }
}
