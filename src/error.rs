use std::path::PathBuf;

use crate::session::SessionState;

/// Result type alias for the recognition pipeline
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the recognition pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("cannot {requested} while session is {from}")]
    InvalidTransition {
        from: SessionState,
        requested: &'static str,
    },

    #[error("intensity grid row {row} has {len} cells, expected {expected}")]
    RaggedGrid {
        row: usize,
        len: usize,
        expected: usize,
    },

    #[error("intensity grid of {width}x{height} cells cannot hold {len} values")]
    GridSize {
        width: usize,
        height: usize,
        len: usize,
    },

    #[error("template persistence failed for {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}
