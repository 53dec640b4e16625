pub mod types;

// Re-export the most important types for easy access from other crates.
pub use types::{
    ClientId, EntrySignal, IdempotencyToken, Instrument, InstrumentId, OrderAck, OrderStatus,
    OrderTicket, Position, PositionStatus, RiskLimits, Side, Tick,
};
