use crate::{Error, Result, TickFeed, TickStream};
use async_stream::stream;
use async_trait::async_trait;
use core_types::{InstrumentId, Tick};
use std::collections::HashMap;
use std::time::Duration;

/// A feed that replays scripted tick sequences.
///
/// Drives the paper session and the integration tests: each instrument gets
/// its ticks in script order, optionally paced by a fixed delay, and the
/// stream ends when the script is exhausted.
pub struct ReplayFeed {
    scripts: HashMap<InstrumentId, Vec<Tick>>,
    pace: Duration,
}

impl ReplayFeed {
    pub fn new(pace: Duration) -> Self {
        Self {
            scripts: HashMap::new(),
            pace,
        }
    }

    /// Adds the tick script for one instrument.
    pub fn load(&mut self, instrument: InstrumentId, ticks: Vec<Tick>) {
        self.scripts.insert(instrument, ticks);
    }
}

#[async_trait]
impl TickFeed for ReplayFeed {
    fn name(&self) -> &'static str {
        "ReplayFeed"
    }

    async fn subscribe(&self, instrument: &InstrumentId) -> Result<TickStream> {
        let ticks = self
            .scripts
            .get(instrument)
            .cloned()
            .ok_or_else(|| Error::UnknownInstrument(instrument.clone()))?;
        let pace = self.pace;
        let id = instrument.clone();

        tracing::info!(instrument = %id, count = ticks.len(), "Replay subscription opened.");

        Ok(Box::pin(stream! {
            for tick in ticks {
                if !pace.is_zero() {
                    tokio::time::sleep(pace).await;
                }
                yield Ok(tick);
            }
            tracing::info!(instrument = %id, "Replay script exhausted.");
        }))
    }
}
