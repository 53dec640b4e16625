use core_types::IdempotencyToken;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Order rejected by venue: {reason}")]
    Rejected { reason: String },

    #[error("Order acknowledgment timed out after {attempts} attempts (token {token})")]
    Timeout {
        token: IdempotencyToken,
        attempts: u32,
    },

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Unknown order: {0}")]
    UnknownOrder(String),
}

pub type Result<T> = std::result::Result<T, Error>;
