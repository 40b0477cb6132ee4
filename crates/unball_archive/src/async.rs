//! Async extraction using tokio

use crate::{
    error::{ExtractError, Result},
    extractor::Extractor,
    progress::{NoProgressReporter, ProgressReporter},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;

/// Runs a shared [`Extractor`] on tokio's blocking thread pool
pub struct AsyncExtractor<P: ProgressReporter = NoProgressReporter> {
    inner: Arc<Extractor<P>>,
}

impl<P: ProgressReporter> AsyncExtractor<P> {
    /// Wrap a configured extractor
    pub fn new(extractor: Extractor<P>) -> Self {
        Self {
            inner: Arc::new(extractor),
        }
    }

    /// The wrapped extractor
    pub fn inner(&self) -> &Extractor<P> {
        &self.inner
    }
}

impl<P: ProgressReporter> Clone for AsyncExtractor<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: ProgressReporter + Send + Sync + 'static> AsyncExtractor<P> {
    /// Extract `source` without blocking the async runtime.
    ///
    /// See [`Extractor::extract`].
    pub async fn extract(&self, source: &Path, target: Option<&Path>) -> Result<PathBuf> {
        let inner = Arc::clone(&self.inner);
        let source = source.to_owned();
        let target = target.map(Path::to_path_buf);

        task::spawn_blocking(move || inner.extract(&source, target.as_deref()))
            .await
            .map_err(|e| ExtractError::Io(std::io::Error::other(e)))?
    }
}
