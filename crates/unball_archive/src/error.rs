//! Error types for the unball_archive crate

use std::path::PathBuf;
use std::time::Duration;

/// Result type for extraction operations
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Error type for extraction operations
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// I/O error during extraction
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The file's type has no extractor mapping at all, or is known to be
    /// unextractable (in which case a description is attached)
    #[error("Unsupported file type {mimetype}{}", .description.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    UnsupportedFiletype {
        mimetype: String,
        description: Option<String>,
    },

    /// The file type is supported but none of its tools are usable here
    #[error("No viable extractor found for {mimetype}")]
    NoExtractor { mimetype: String },

    /// The extractor reported success but the staging directory is empty
    #[error("Extraction reported success but produced nothing from {}", .path.display())]
    NothingProduced { path: PathBuf },

    /// Every candidate of a trial-based extractor was tried and none produced output
    #[error("All extraction attempts failed for {mimetype}{}", .hint.as_deref().map(|h| format!(". {h}")).unwrap_or_default())]
    AllCandidatesFailed {
        mimetype: String,
        hint: Option<String>,
    },

    /// Source file does not exist
    #[error("Source file does not exist: {}", .path.display())]
    SourceNotFound { path: PathBuf },

    /// Source path is a directory
    #[error("Source file is a directory: {}", .path.display())]
    SourceIsDirectory { path: PathBuf },

    /// Source file cannot be read
    #[error("Access denied to source file: {}", .path.display())]
    SourcePermissionDenied { path: PathBuf },

    /// The computed output path is already taken
    #[error("Refusing to overwrite existing path: {}", .path.display())]
    AlreadyExists { path: PathBuf },

    /// An external tool exited with a non-zero status
    #[error("{tool} returned non-zero exit status {code}")]
    ToolFailed { tool: String, code: i32 },

    /// An external tool was terminated by a signal
    #[error("{tool} was killed by signal {signal}")]
    ToolKilled { tool: String, signal: i32 },

    /// An external tool ran longer than the configured timeout
    #[error("{tool} did not finish within {}s and was killed", .timeout.as_secs_f32())]
    ToolTimedOut { tool: String, timeout: Duration },

    /// An external tool could not be started
    #[error("Failed to launch {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// An archive entry would have been written outside the target directory
    #[error("Archive entry escapes the target directory: {}", .entry.display())]
    PathTraversal { entry: PathBuf },

    /// Error extracting zip archive
    #[error("Failed to extract zip archive: {message}")]
    ZipExtraction { message: String },

    /// Error extracting tar archive
    #[error("Failed to extract tar archive: {message}")]
    TarExtraction { message: String },

    /// Error extracting 7z archive
    #[cfg(feature = "sevenz")]
    #[error("Failed to extract 7z archive: {message}")]
    SevenZipExtraction { message: String },

    /// Malformed input for one of the internal decoders
    #[error("Failed to decode {codec} data: {message}")]
    Decode {
        codec: &'static str,
        message: String,
    },

    /// The extractor tables are inconsistent
    #[error("Invalid extractor table: {message}")]
    InvalidTable { message: String },
}

impl ExtractError {
    /// Create a new unsupported file type error
    pub fn unsupported(mimetype: impl Into<String>, description: Option<&str>) -> Self {
        Self::UnsupportedFiletype {
            mimetype: mimetype.into(),
            description: description.map(str::to_owned),
        }
    }

    /// Create a new zip extraction error
    pub fn zip_extraction(message: impl Into<String>) -> Self {
        Self::ZipExtraction {
            message: message.into(),
        }
    }

    /// Create a new tar extraction error
    pub fn tar_extraction(message: impl Into<String>) -> Self {
        Self::TarExtraction {
            message: message.into(),
        }
    }

    /// Create a new 7z extraction error
    #[cfg(feature = "sevenz")]
    pub fn sevenz_extraction(message: impl Into<String>) -> Self {
        Self::SevenZipExtraction {
            message: message.into(),
        }
    }

    /// Create a new decoder error
    pub fn decode(codec: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            codec,
            message: message.into(),
        }
    }

    /// Create a new table consistency error
    pub fn invalid_table(message: impl Into<String>) -> Self {
        Self::InvalidTable {
            message: message.into(),
        }
    }

    /// Errors meaning "this file was not an archive after all".
    ///
    /// Nested unpacking keeps the inner file as-is when it sees one of these.
    pub fn is_not_an_archive(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFiletype { .. }
                | Self::NoExtractor { .. }
                | Self::AllCandidatesFailed { .. }
        )
    }

    /// Errors a single candidate can fail with without aborting a trial run.
    pub fn is_candidate_failure(&self) -> bool {
        match self {
            Self::ToolFailed { .. }
            | Self::ToolTimedOut { .. }
            | Self::ToolSpawn { .. }
            | Self::ZipExtraction { .. }
            | Self::TarExtraction { .. }
            | Self::Decode { .. }
            | Self::NothingProduced { .. } => true,
            #[cfg(feature = "sevenz")]
            Self::SevenZipExtraction { .. } => true,
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// The process exit code representing this error's category.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NothingProduced { .. }
            | Self::AllCandidatesFailed { .. }
            | Self::UnsupportedFiletype { .. } => 1,
            Self::SourceNotFound { .. }
            | Self::SourceIsDirectory { .. }
            | Self::SourcePermissionDenied { .. } => 2,
            Self::Io(err) if err.kind() == std::io::ErrorKind::PermissionDenied => 2,
            Self::AlreadyExists { .. } | Self::Io(_) => 3,
            Self::NoExtractor { .. } => 4,
            Self::ToolFailed { .. }
            | Self::ToolTimedOut { .. }
            | Self::ToolSpawn { .. }
            | Self::PathTraversal { .. }
            | Self::ZipExtraction { .. }
            | Self::TarExtraction { .. }
            | Self::Decode { .. } => 5,
            #[cfg(feature = "sevenz")]
            Self::SevenZipExtraction { .. } => 5,
            Self::ToolKilled { .. } => 6,
            Self::InvalidTable { .. } => 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message_includes_description() {
        let err = ExtractError::unsupported("application/x-iso9660-image", Some("mount it"));
        assert_eq!(
            err.to_string(),
            "Unsupported file type application/x-iso9660-image: mount it"
        );

        let err = ExtractError::unsupported("text/plain", None);
        assert_eq!(err.to_string(), "Unsupported file type text/plain");
    }

    #[test]
    fn test_exit_codes() {
        let nothing = ExtractError::NothingProduced {
            path: PathBuf::from("x"),
        };
        assert_eq!(nothing.exit_code(), 1);
        assert_eq!(
            ExtractError::SourceNotFound {
                path: PathBuf::from("x")
            }
            .exit_code(),
            2
        );
        assert_eq!(
            ExtractError::AlreadyExists {
                path: PathBuf::from("x")
            }
            .exit_code(),
            3
        );
        assert_eq!(
            ExtractError::NoExtractor {
                mimetype: "application/x-rar".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(
            ExtractError::ToolFailed {
                tool: "unzip".into(),
                code: 9
            }
            .exit_code(),
            5
        );
        assert_eq!(
            ExtractError::ToolKilled {
                tool: "unace".into(),
                signal: 2
            }
            .exit_code(),
            6
        );
        assert_eq!(ExtractError::invalid_table("x").exit_code(), 7);
    }

    #[test]
    fn test_classification() {
        assert!(ExtractError::unsupported("text/plain", None).is_not_an_archive());
        assert!(ExtractError::NoExtractor {
            mimetype: "application/x-rar".into()
        }
        .is_not_an_archive());
        assert!(!ExtractError::AlreadyExists {
            path: PathBuf::from("x")
        }
        .is_not_an_archive());

        assert!(ExtractError::ToolFailed {
            tool: "unrar".into(),
            code: 3
        }
        .is_candidate_failure());
        assert!(!ExtractError::ToolKilled {
            tool: "unrar".into(),
            signal: 15
        }
        .is_candidate_failure());
        assert!(ExtractError::Io(std::io::Error::from(std::io::ErrorKind::InvalidData))
            .is_candidate_failure());
        assert!(!ExtractError::Io(std::io::Error::from(std::io::ErrorKind::NotFound))
            .is_candidate_failure());
    }
}
