use thiserror::Error;

use crate::queue::QueueError;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker task joined with an error: {0}")]
    JoinError(String),
    #[error("Worker queue operation failed: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Error, Debug)]
pub struct ShutdownError {
    pub errors: Vec<WorkerError>,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Errors during shutdown: {:?}", self.errors)
    }
}
