use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("State store operation failed: {0}")]
    OperationFailed(String),

    #[error("Snapshot is stale: {0}")]
    StaleSnapshot(String),
}

pub type Result<T> = std::result::Result<T, Error>;
