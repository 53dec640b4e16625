use async_trait::async_trait;
use core_types::{ClientId, InstrumentId, Tick};
use futures::Stream;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::pin::Pin;

pub mod error;
pub mod registry;
pub mod replay;

// Re-export public types
pub use error::{Error, Result};
pub use registry::StaticRegistry;
pub use replay::ReplayFeed;

/// A pinned, boxed stream of ticks for one instrument.
pub type TickStream = Pin<Box<dyn Stream<Item = Result<Tick>> + Send>>;

/// The universal interface to a market data source.
///
/// The engine subscribes once per instrument and fans the resulting stream
/// out to every (client, instrument) pair watching it. An `Err` item is a
/// disconnect: the engine pauses decisioning for the instrument and
/// resubscribes with backoff. A stream that ends cleanly has no more data
/// for the session.
#[async_trait]
pub trait TickFeed: Send + Sync {
    /// The name of the feed (e.g., "ReplayFeed").
    fn name(&self) -> &'static str;

    /// Opens a tick stream for one instrument. Ticks arrive in exchange
    /// order; the engine preserves that order per pair.
    async fn subscribe(&self, instrument: &InstrumentId) -> Result<TickStream>;
}

/// Resolves tradable instruments and each client's active watchlist.
#[async_trait]
pub trait InstrumentRegistry: Send + Sync {
    /// The instruments a client is currently watching; drives subscriptions.
    async fn active_instruments(&self, client: &ClientId) -> Result<HashSet<InstrumentId>>;

    /// The day-open price anchoring the day-range rule for an instrument.
    async fn day_open(&self, instrument: &InstrumentId) -> Result<Decimal>;
}
