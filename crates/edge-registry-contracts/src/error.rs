use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Bad name/version format, non-finite metric, or missing source file.
    /// Always raised before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("model '{name}' version '{version}' already exists in registry")]
    DuplicateVersion { name: String, version: String },

    #[error("artifact directory {} is already populated", path.display())]
    ArtifactConflict { path: PathBuf },

    #[error("artifact not found at {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("metadata file {} is corrupt: {reason}", path.display())]
    CorruptMetadata { path: PathBuf, reason: String },

    /// The durable write failed; the previously committed file is intact.
    #[error("failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("model '{0}' not found in registry")]
    ModelNotFound(String),

    #[error("model '{name}' has no version '{version}'")]
    VersionNotFound { name: String, version: String },

    #[error("artifact {} failed integrity check: expected sha256 {expected}, found {actual}", path.display())]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    DuplicateVersion,
    ArtifactConflict,
    ArtifactNotFound,
    CorruptMetadata,
    Persistence,
    ModelNotFound,
    VersionNotFound,
    IntegrityMismatch,
    Io,
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::DuplicateVersion { .. } => ErrorKind::DuplicateVersion,
            Self::ArtifactConflict { .. } => ErrorKind::ArtifactConflict,
            Self::ArtifactNotFound { .. } => ErrorKind::ArtifactNotFound,
            Self::CorruptMetadata { .. } => ErrorKind::CorruptMetadata,
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::ModelNotFound(_) => ErrorKind::ModelNotFound,
            Self::VersionNotFound { .. } => ErrorKind::VersionNotFound,
            Self::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::{ErrorKind, RegistryError};

    #[test]
    fn kind_distinguishes_without_message_inspection() {
        let validation = RegistryError::validation("bad version");
        let persistence = RegistryError::persistence(
            "/tmp/registry.json",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(validation.kind(), ErrorKind::Validation);
        assert_eq!(persistence.kind(), ErrorKind::Persistence);
        assert_ne!(validation.kind(), persistence.kind());
    }

    #[test]
    fn persistence_keeps_io_source() {
        let err = RegistryError::persistence(
            "/tmp/registry.json",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("disk full"));
        assert!(err.to_string().contains("registry.json"));
    }
}
