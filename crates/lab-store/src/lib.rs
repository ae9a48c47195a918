use lab_core::ValidationError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

mod bulk;
pub mod persistence;
mod store;

pub use bulk::BulkLoadSummary;
pub use persistence::{Collections, JsonFileStore, LoadOutcome};
pub use store::LabStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("data directory {} is locked by another process", .path.display())]
    Locked { path: PathBuf },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the caller sent something the store refused, as opposed to a
    /// failure on the server side.
    pub fn is_client_error(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}
