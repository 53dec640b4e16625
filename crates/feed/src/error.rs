use core_types::InstrumentId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Feed disconnected: {0}")]
    Disconnected(String),

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(InstrumentId),
}

pub type Result<T> = std::result::Result<T, Error>;
