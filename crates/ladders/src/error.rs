use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid ladder configuration: {0}")]
    InvalidLadder(String),
}

pub type Result<T> = std::result::Result<T, Error>;
