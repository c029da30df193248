use std::path::PathBuf;

use thiserror::Error;

use crate::core::domain::MetaError;

/// Faults raised by `Scheduler::handle` before a submission is registered.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("submission id: {0} file not found")]
    NotFound(String),
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("duplicated submission id {0}")]
    Duplicated(String),
    #[error("job queue is full (capacity {capacity}), retry later")]
    QueueFull { capacity: usize },
    #[error(transparent)]
    InvalidMeta(#[from] MetaError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// The caller may submit the same id again later.
    pub fn is_retriable(&self) -> bool {
        matches!(self, DispatchError::QueueFull { .. })
    }
}
