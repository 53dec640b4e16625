use core_types::ClientId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Trading vetoed for client {client}: {reason}")]
    Vetoed { client: ClientId, reason: String },

    #[error("Unknown client: {0}")]
    UnknownClient(ClientId),
}

pub type Result<T> = std::result::Result<T, Error>;
