//! Main extractor implementation

use crate::{
    error::{ExtractError, Result},
    mimetype::TypeResolver,
    progress::{NoProgressReporter, ProgressReporter},
    registry::Registry,
    staging::{normalize_permissions, StagingDir},
    strategy::InvokeOptions,
};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

/// How many nested single-file layers are unwrapped before giving up
pub const DEFAULT_RECURSION_LIMIT: usize = 5;

/// Builder for configuring extraction
pub struct ExtractorBuilder<P: ProgressReporter = NoProgressReporter> {
    registry: Option<Arc<Registry>>,
    resolver: Option<TypeResolver>,
    collapse: bool,
    prefer_contained_name: bool,
    recursion_limit: usize,
    options: InvokeOptions,
    progress_reporter: P,
}

impl ExtractorBuilder<NoProgressReporter> {
    /// Create a new extractor builder
    pub fn new() -> Self {
        Self {
            registry: None,
            resolver: None,
            collapse: true,
            prefer_contained_name: true,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            options: InvokeOptions::default(),
            progress_reporter: NoProgressReporter,
        }
    }
}

impl<P: ProgressReporter> ExtractorBuilder<P> {
    /// Use a specific registry instead of the built-in tables
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use a specific type resolver
    pub fn with_resolver(mut self, resolver: TypeResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// When an archive holds exactly one top-level item, publish that item
    /// directly instead of wrapping it in a folder
    pub fn with_collapse(mut self, collapse: bool) -> Self {
        self.collapse = collapse;
        self
    }

    /// Publish a collapsed item under its own name rather than the
    /// archive's
    pub fn with_prefer_contained_name(mut self, prefer: bool) -> Self {
        self.prefer_contained_name = prefer;
        self
    }

    /// Maximum depth of nested single-file archives to unwrap
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Let external tools write to our stdout and stderr
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.options.verbose = verbose;
        self
    }

    /// Kill external tools that run longer than this
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.timeout = timeout;
        self
    }

    /// Set a custom progress reporter
    pub fn with_progress_reporter<R: ProgressReporter>(self, reporter: R) -> ExtractorBuilder<R> {
        ExtractorBuilder {
            registry: self.registry,
            resolver: self.resolver,
            collapse: self.collapse,
            prefer_contained_name: self.prefer_contained_name,
            recursion_limit: self.recursion_limit,
            options: self.options,
            progress_reporter: reporter,
        }
    }

    /// Build the extractor
    pub fn build(self) -> Result<Extractor<P>> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(Registry::builtin()?),
        };
        Ok(Extractor {
            registry,
            resolver: self.resolver.unwrap_or_default(),
            collapse: self.collapse,
            prefer_contained_name: self.prefer_contained_name,
            recursion_limit: self.recursion_limit,
            options: self.options,
            progress_reporter: self.progress_reporter,
        })
    }

    /// Build an extractor that runs on tokio's blocking pool
    #[cfg(feature = "tokio")]
    pub fn build_async(self) -> Result<crate::r#async::AsyncExtractor<P>> {
        Ok(crate::r#async::AsyncExtractor::new(self.build()?))
    }
}

impl Default for ExtractorBuilder<NoProgressReporter> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "progress")]
impl ExtractorBuilder<NoProgressReporter> {
    /// Set an indicatif progress bar
    pub fn with_progress_bar(
        self,
        progress_bar: indicatif::ProgressBar,
    ) -> ExtractorBuilder<crate::progress::IndicatifProgressReporter> {
        self.with_progress_reporter(crate::progress::IndicatifProgressReporter::new(
            progress_bar,
        ))
    }
}

/// Archive extractor
pub struct Extractor<P: ProgressReporter = NoProgressReporter> {
    registry: Arc<Registry>,
    resolver: TypeResolver,
    collapse: bool,
    prefer_contained_name: bool,
    recursion_limit: usize,
    options: InvokeOptions,
    progress_reporter: P,
}

impl<P: ProgressReporter> Extractor<P> {
    /// The registry this extractor dispatches through
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Extract `source` into `target`, or next to the source if `None`.
    ///
    /// Everything is unpacked into a private staging directory first and
    /// moved into place with a single rename, so the destination never
    /// holds a half-extracted archive. Returns the path of whatever was
    /// published. The source file is never modified.
    pub fn extract(&self, source: &Path, target: Option<&Path>) -> Result<PathBuf> {
        let result = self.extract_at_level(source, target, 0);
        match &result {
            Ok(published) => self
                .progress_reporter
                .on_finish(&format!("Extracted {}", published.display())),
            Err(err) => self.progress_reporter.on_finish(&format!("Failed: {err}")),
        }
        result
    }

    fn extract_at_level(&self, source: &Path, target: Option<&Path>, level: usize) -> Result<PathBuf> {
        let source = std::path::absolute(source)?;

        // Resolution validates the source before anything else happens.
        let resolved = self.resolver.resolve(&source, &self.registry)?;
        let candidates = self.registry.candidates_for(&resolved.mimetypes)?;
        let Some(strategy) = candidates.first() else {
            return Err(ExtractError::NoExtractor {
                mimetype: resolved.primary().to_owned(),
            });
        };

        let target_dir = match target {
            Some(dir) => std::path::absolute(dir)?,
            None => source
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| ExtractError::SourceIsDirectory {
                    path: source.clone(),
                })?,
        };

        tracing::debug!(
            "{} resolved as {} (detected {})",
            source.display(),
            resolved.primary(),
            resolved.detected
        );
        self.progress_reporter.on_start(&source, resolved.primary());

        let staging = StagingDir::new_in(&target_dir)?;

        self.progress_reporter.on_extractor(&strategy.name());
        tracing::info!("Extracting {} with {}", source.display(), strategy.name());
        if let Err(err) = strategy.extract(&source, staging.path(), &self.options) {
            if !matches!(err, ExtractError::AllCandidatesFailed { .. }) {
                if let Some(hint) = self.registry.hint(resolved.primary()) {
                    tracing::warn!("{hint}");
                }
            }
            return Err(err);
        }

        normalize_permissions(staging.path())?;

        let mut entries = staging.entries()?;
        if entries.is_empty() {
            return Err(ExtractError::NothingProduced { path: source });
        }

        let mut default_name = source.file_stem().map(ToOwned::to_owned);
        if entries.len() == 1 && level < self.recursion_limit && is_regular_file(&entries[0])? {
            let inner = &entries[0];
            match self.extract_at_level(inner, None, level + 1) {
                Ok(unwrapped) => {
                    tracing::debug!(
                        "unwrapped nested {} into {}",
                        inner.display(),
                        unwrapped.display()
                    );
                    fs_err::remove_file(inner)?;
                    default_name = inner.file_stem().map(ToOwned::to_owned);
                }
                Err(err) if err.is_not_an_archive() => {
                    tracing::trace!("keeping {} as-is: {err}", inner.display());
                }
                Err(err) => return Err(err),
            }
            entries = staging.entries()?;
        }

        // Inner layers always collapse under their own name; only the
        // outermost level follows the configured policy.
        let collapse = (self.collapse || level > 0) && entries.len() == 1;
        let contained_name = self.prefer_contained_name || level > 0;
        let name = match entries.first() {
            Some(entry) if collapse && contained_name => entry.file_name().map(ToOwned::to_owned),
            _ => default_name,
        }
        .unwrap_or_else(|| OsString::from("extracted"));

        let mut destination = target_dir.join(name);
        if destination == source {
            destination.as_mut_os_string().push(".out");
        }

        let published = match entries.first() {
            Some(entry) if collapse => staging.publish_entry(entry, &destination)?,
            _ => staging.publish_all(&destination)?,
        };
        tracing::info!("Extracted {} to {}", source.display(), published.display());
        Ok(published)
    }
}

fn is_regular_file(path: &Path) -> Result<bool> {
    Ok(fs_err::symlink_metadata(path)?.file_type().is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn extractor() -> Extractor {
        ExtractorBuilder::new()
            .with_registry(Arc::new(Registry::internal_only().unwrap()))
            .with_resolver(TypeResolver::infer_only())
            .build()
            .unwrap()
    }

    fn create_test_tar_gz(dir: &TempDir, entries: &[&str]) -> PathBuf {
        let tar_path = dir.path().join("test.tar.gz");

        let file = File::create(&tar_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut tar = tar::Builder::new(encoder);

        for name in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(5);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, "hello".as_bytes()).unwrap();
        }

        tar.into_inner().unwrap().finish().unwrap();
        tar_path
    }

    fn gzip_layers(path: &Path, payload: &[u8], layers: usize) {
        let mut data = payload.to_vec();
        for _ in 0..layers {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
            encoder.write_all(&data).unwrap();
            data = encoder.finish().unwrap();
        }
        fs_err::write(path, data).unwrap();
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs_err::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_extract_tar_gz_peels_gzip_layer() {
        let archive_dir = tempfile::tempdir().unwrap();
        let archive_path = create_test_tar_gz(&archive_dir, &["a.txt", "b.txt"]);
        let extract_dir = tempfile::tempdir().unwrap();

        let published = extractor()
            .extract(&archive_path, Some(extract_dir.path()))
            .unwrap();

        assert_eq!(published, extract_dir.path().join("test"));
        assert_eq!(names(&published), ["a.txt", "b.txt"]);
        assert_eq!(names(extract_dir.path()), ["test"]);
        assert!(archive_path.is_file());
    }

    #[test]
    fn test_single_entry_keeps_its_own_name() {
        let archive_dir = tempfile::tempdir().unwrap();
        let archive_path = create_test_tar_gz(&archive_dir, &["only.txt"]);
        let extract_dir = tempfile::tempdir().unwrap();

        let published = extractor()
            .extract(&archive_path, Some(extract_dir.path()))
            .unwrap();
        assert_eq!(published, extract_dir.path().join("only.txt"));

        let renamed = ExtractorBuilder::new()
            .with_registry(Arc::new(Registry::internal_only().unwrap()))
            .with_resolver(TypeResolver::infer_only())
            .with_prefer_contained_name(false)
            .build()
            .unwrap()
            .extract(&archive_path, Some(extract_dir.path()))
            .unwrap();
        assert_eq!(renamed, extract_dir.path().join("test"));
        assert!(renamed.is_file());

        let wrap_dir = tempfile::tempdir().unwrap();
        let wrapped = ExtractorBuilder::new()
            .with_registry(Arc::new(Registry::internal_only().unwrap()))
            .with_resolver(TypeResolver::infer_only())
            .with_collapse(false)
            .build()
            .unwrap()
            .extract(&archive_path, Some(wrap_dir.path()))
            .unwrap();
        assert_eq!(wrapped, wrap_dir.path().join("test"));
        assert!(wrapped.join("only.txt").is_file());
    }

    #[test]
    fn test_extensionless_output_gets_out_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("blob");
        gzip_layers(&source, b"not an archive", 1);

        let published = extractor().extract(&source, None).unwrap();

        assert_eq!(published, dir.path().join("blob.out"));
        assert_eq!(fs_err::read(&published).unwrap(), b"not an archive");
        assert!(source.is_file());
    }

    #[test]
    fn test_recursion_limit_leaves_inner_layer_packed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("deep.gz");
        gzip_layers(&source, b"bottom", 3);
        let out = tempfile::tempdir().unwrap();

        let published = ExtractorBuilder::new()
            .with_registry(Arc::new(Registry::internal_only().unwrap()))
            .with_resolver(TypeResolver::infer_only())
            .with_recursion_limit(1)
            .build()
            .unwrap()
            .extract(&source, Some(out.path()))
            .unwrap();

        let data = fs_err::read(&published).unwrap();
        assert!(infer::archive::is_gz(&data));
        assert_eq!(names(out.path()).len(), 1);
    }

    #[test]
    fn test_unsupported_source_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("notes.txt");
        fs_err::write(&source, "just text").unwrap();

        assert_matches!(
            extractor().extract(&source, None),
            Err(ExtractError::UnsupportedFiletype { .. })
        );
        assert_eq!(names(dir.path()), ["notes.txt"]);
    }

    #[test]
    fn test_failed_extraction_cleans_up_staging() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.tar.gz");
        fs_err::write(&source, [0x1f, 0x8b, 0x08, 0x00, 0xde, 0xad]).unwrap();

        assert!(extractor().extract(&source, None).is_err());
        assert_eq!(names(dir.path()), ["broken.tar.gz"]);
    }
}
