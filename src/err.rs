use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiagError>;

/// Errors which abort a whole run.
#[derive(Debug, Error)]
pub enum DiagError {
    #[error("Failed to extract archive `{}`: {message}", path.display())]
    Extraction { path: PathBuf, message: String },

    #[error("Failed to merge `{}` into the final tree: {source}", path.display())]
    Merge {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write output archive `{}`: {message}", path.display())]
    Packaging { path: PathBuf, message: String },

    #[error("An I/O error has occurred while trying to {action} `{}`: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DiagError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        DiagError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        DiagError::Extraction {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn packaging(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        DiagError::Packaging {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Per-file conversion failures. These never abort a run, the raw file stays eligible
/// for passthrough instead.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Failed to read `{}`: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write `{}`: {source}", path.display())]
    Unwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to spawn decoder `{program}`: {source}")]
    DecoderSpawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Decoder `{program}` exited with {status}: {stderr}")]
    DecoderFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("No decoder is configured for `{kind}` files")]
    NoDecoder { kind: &'static str },

    #[error("Decoder produced no usable rows for `{}`", path.display())]
    NoRows { path: PathBuf },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Non-fatal: the working directory could not be removed after packaging.
#[derive(Debug, Error)]
#[error("Working directory `{}` was left behind after {attempts} attempt(s): {source}", path.display())]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub attempts: u32,
    #[source]
    pub source: io::Error,
}
