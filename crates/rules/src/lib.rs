use chrono::{DateTime, Utc};
use core_types::{EntrySignal, Instrument};

pub mod day_range;
pub mod error;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use types::{DayRangeSettings, Sizing};

/// The universal interface for an entry rule.
///
/// An entry rule inspects an instrument's intraday range and decides whether
/// a new position should be opened and in which direction. It must be pure
/// given its inputs: evaluating the same instrument snapshot twice without an
/// intervening state change must produce the same signal.
pub trait EntryRule: Send + Sync {
    /// The name of the rule.
    fn name(&self) -> &'static str;

    /// Evaluates the rule for an instrument with no existing position.
    ///
    /// `now` is the evaluation clock for the staleness guard. A tick-driven
    /// caller passes the tick's own timestamp, which always satisfies the
    /// guard; the guard rejects out-of-band evaluations (resumed state,
    /// operator re-checks) made against a quote older than the configured
    /// window.
    fn evaluate(&self, instrument: &Instrument, now: DateTime<Utc>, sizing: &Sizing)
    -> EntrySignal;
}
