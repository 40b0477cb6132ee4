//! Working out what kind of file we were handed
//!
//! Content sniffing comes first. When no detector recognises the content as
//! something the registry knows about, the file's last suffix is looked up
//! in the extension table instead.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{ExtractError, Result};
use crate::registry::Registry;
use crate::strategy::ViabilityCache;

/// What detectors report when they have nothing better to say
pub const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// A source of raw mimetype guesses
pub trait MimeDetector: Debug + Send + Sync {
    /// Name used in log output
    fn name(&self) -> &str;

    /// Whether this detector can run on this host
    fn is_viable(&self) -> bool;

    /// Inspect the file at `path`. `None` means "no idea".
    fn detect(&self, path: &Path) -> Result<Option<String>>;
}

/// Magic-byte sniffing with the `infer` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct InferDetector;

impl MimeDetector for InferDetector {
    fn name(&self) -> &str {
        "infer"
    }

    fn is_viable(&self) -> bool {
        true
    }

    fn detect(&self, path: &Path) -> Result<Option<String>> {
        Ok(infer::get_from_path(path)?.map(|kind| kind.mime_type().to_owned()))
    }
}

/// `file --brief --mime-type`, when installed
#[derive(Debug, Default)]
pub struct FileCommandDetector {
    viable: ViabilityCache,
}

impl MimeDetector for FileCommandDetector {
    fn name(&self) -> &str {
        "file"
    }

    fn is_viable(&self) -> bool {
        self.viable.check(|| which::which("file").is_ok())
    }

    fn detect(&self, path: &Path) -> Result<Option<String>> {
        let output = Command::new("file")
            .args(["--brief", "--mime-type", "--"])
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();

        match output {
            Ok(output) if output.status.success() => {
                Ok(clean_mimetype(&String::from_utf8_lossy(&output.stdout)))
            }
            Ok(output) => {
                tracing::debug!("file exited with {}", output.status);
                Ok(None)
            }
            Err(err) => {
                tracing::debug!("could not run file: {err}");
                Ok(None)
            }
        }
    }
}

/// Normalise a detector's output: first token only, without trailing
/// punctuation, lowercased.
pub fn clean_mimetype(raw: &str) -> Option<String> {
    let token = raw
        .split_whitespace()
        .next()?
        .trim_end_matches([',', ';']);
    (!token.is_empty()).then(|| token.to_ascii_lowercase())
}

/// The outcome of type resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    /// What content sniffing reported, or [`DEFAULT_MIMETYPE`]
    pub detected: String,
    /// Mimetypes to look up in the registry, in order of preference
    pub mimetypes: Vec<String>,
}

impl ResolvedType {
    /// The mimetype used in messages
    pub fn primary(&self) -> &str {
        self.mimetypes
            .first()
            .map(String::as_str)
            .unwrap_or(&self.detected)
    }
}

/// Runs a chain of [`MimeDetector`]s with extension fallback
#[derive(Debug)]
pub struct TypeResolver {
    detectors: Vec<Box<dyn MimeDetector>>,
}

impl Default for TypeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeResolver {
    /// `infer`, then `file` if it is installed
    pub fn new() -> Self {
        Self::with_detectors(vec![
            Box::new(InferDetector),
            Box::new(FileCommandDetector::default()),
        ])
    }

    /// Only in-process sniffing, for results that don't depend on the host
    pub fn infer_only() -> Self {
        Self::with_detectors(vec![Box::new(InferDetector)])
    }

    /// A custom detector chain, consulted in order
    pub fn with_detectors(detectors: Vec<Box<dyn MimeDetector>>) -> Self {
        Self { detectors }
    }

    /// Determine the mimetype(s) of `path`.
    ///
    /// The first detector result the registry knows wins. Otherwise the
    /// file's suffix is looked up, and failing that the raw detection is
    /// returned so callers can tell "unknown" from "known but unsupported".
    pub fn resolve(&self, path: &Path, registry: &Registry) -> Result<ResolvedType> {
        let real_path = check_source(path)?;

        let mut first_guess = None;
        for detector in self.detectors.iter().filter(|d| d.is_viable()) {
            let Some(mimetype) = detector.detect(&real_path)?.as_deref().and_then(clean_mimetype)
            else {
                continue;
            };
            tracing::trace!("{} detected {mimetype} for {}", detector.name(), path.display());

            if registry.is_known(&mimetype) {
                return Ok(ResolvedType {
                    mimetypes: vec![registry.canonicalize(&mimetype)],
                    detected: mimetype,
                });
            }
            first_guess.get_or_insert(mimetype);
        }

        let detected = first_guess.unwrap_or_else(|| DEFAULT_MIMETYPE.to_owned());
        if let Some(mimetypes) = extension_of(path)
            .as_deref()
            .and_then(|ext| registry.mimetypes_for_extension(ext))
        {
            tracing::debug!(
                "{} sniffed as {detected}, falling back to its extension",
                path.display()
            );
            return Ok(ResolvedType {
                detected,
                mimetypes: mimetypes.to_vec(),
            });
        }

        Ok(ResolvedType {
            mimetypes: vec![detected.clone()],
            detected,
        })
    }
}

/// The lowercased last suffix of a path's file name, dot included
pub fn extension_of(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

/// Make sure `path` names a readable regular file, returning it with
/// symlinks resolved.
pub(crate) fn check_source(path: &Path) -> Result<PathBuf> {
    let real_path = fs_err::canonicalize(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => ExtractError::SourceNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => ExtractError::SourcePermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ExtractError::Io(err),
    })?;

    if fs_err::metadata(&real_path)?.is_dir() {
        return Err(ExtractError::SourceIsDirectory {
            path: path.to_path_buf(),
        });
    }

    match fs_err::File::open(&real_path) {
        Ok(_) => Ok(real_path),
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(ExtractError::SourcePermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(err) => Err(err.into()),
    }
}
