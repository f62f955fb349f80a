use std::path::{Path, PathBuf};
use thiserror::Error;

/// The main error type for dataset pipeline operations.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error on {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("'{path}' already exists; remove it or use the clean option to overwrite it")]
    AlreadyExists { path: PathBuf },

    #[error("Renderer command `{command}` failed ({status})\n{stdout}\n{stderr}")]
    ExternalProcess {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to parse manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to write manifest {path}: {source}")]
    ManifestWrite {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed while traversing {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to read image dimensions from {path}: {source}")]
    ImageDimensionRead {
        path: PathBuf,
        #[source]
        source: imagesize::ImageError,
    },

    #[error("Invalid registry record {path}: {source}")]
    RegistryRecord {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write COCO JSON to {path}: {source}")]
    CocoWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write JSON report: {source}")]
    ReportWrite {
        #[source]
        source: serde_json::Error,
    },

    #[error("Build finished with {error_count} error(s)")]
    BuildFailed { error_count: usize },
}

impl DatasetError {
    /// Shorthand for a [`DatasetError::Configuration`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns a mapper that attaches `path` to an IO error.
    pub(crate) fn at(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::FileIo {
            path: path.to_path_buf(),
            source,
        }
    }
}
