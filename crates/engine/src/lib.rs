use anyhow::Context;
use app_config::{ClientsConfig, Settings};
use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use core_types::{ClientId, Instrument, InstrumentId, Tick};
use events::EngineEvent;
use execution::OrderGateway;
use feed::{InstrumentRegistry, TickFeed};
use futures::StreamExt;
use futures::future::join_all;
use ladders::{TargetLadder, TrailingLadder};
use risk::RiskGovernor;
use rules::EntryRule;
use rules::day_range::DayRangeRule;
use rust_decimal::Decimal;
use state_store::StateStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

mod pair;
pub mod reconciler;
pub mod scheduler;

pub use reconciler::Reconciler;
pub use scheduler::SquareOffScheduler;

use pair::{PairConfig, PairWorker};

/// Why a forced flatten was ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlattenReason {
    KillSwitch,
    SquareOff,
    RiskBreach,
}

impl FlattenReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlattenReason::KillSwitch => "kill switch",
            FlattenReason::SquareOff => "square off",
            FlattenReason::RiskBreach => "risk breach",
        }
    }
}

/// Control messages fanned out to every pair worker.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Close everything for one client, or for all clients when `client`
    /// is `None`.
    ForceFlatten {
        client: Option<ClientId>,
        reason: FlattenReason,
    },
}

/// A cloneable control surface over a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    governor: Arc<RiskGovernor>,
    commands: broadcast::Sender<EngineCommand>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn realized(&self, client: &ClientId) -> risk::Result<Decimal> {
        self.governor.realized(client)
    }

    pub fn is_trading_allowed(&self, client: &ClientId) -> bool {
        self.governor.is_trading_allowed(client)
    }

    /// Flips a client's kill switch. Engaging it blocks new entries at the
    /// governor and orders every open position for the client flattened.
    pub fn set_kill_switch(&self, client: &ClientId, engaged: bool) -> risk::Result<bool> {
        let changed = self.governor.set_kill_switch(client, engaged)?;
        if changed && engaged {
            let _ = self.events.send(EngineEvent::KillSwitchEngaged {
                client: client.clone(),
                reason: "operator request".to_string(),
            });
            let _ = self.commands.send(EngineCommand::ForceFlatten {
                client: Some(client.clone()),
                reason: FlattenReason::KillSwitch,
            });
        }
        Ok(changed)
    }

    /// Ends the trading day: every pair of every client is flattened.
    pub fn square_off(&self) {
        let at = Utc::now();
        info!(%at, "Square-off ordered.");
        let _ = self.events.send(EngineEvent::SquareOffTriggered { at });
        let _ = self.commands.send(EngineCommand::ForceFlatten {
            client: None,
            reason: FlattenReason::SquareOff,
        });
    }
}

/// Orchestrates the trading session.
///
/// One task per (client, instrument) pair owns that pair's position; one
/// router task per instrument fans its tick stream out to the pairs watching
/// it. Commands travel on a broadcast channel that every worker polls ahead
/// of market data.
pub struct Engine {
    settings: Settings,
    roster: ClientsConfig,
    rule: Arc<dyn EntryRule>,
    trailing: Arc<TrailingLadder>,
    targets: Arc<TargetLadder>,
    governor: Arc<RiskGovernor>,
    feed: Arc<dyn TickFeed>,
    registry: Arc<dyn InstrumentRegistry>,
    gateway: Arc<dyn OrderGateway>,
    store: Arc<dyn StateStore>,
    commands: broadcast::Sender<EngineCommand>,
    events: broadcast::Sender<EngineEvent>,
}

impl Engine {
    pub fn new(
        settings: Settings,
        roster: ClientsConfig,
        feed: Arc<dyn TickFeed>,
        registry: Arc<dyn InstrumentRegistry>,
        gateway: Arc<dyn OrderGateway>,
        store: Arc<dyn StateStore>,
        events: broadcast::Sender<EngineEvent>,
    ) -> anyhow::Result<Self> {
        let rule: Arc<dyn EntryRule> = Arc::new(
            DayRangeRule::new(&settings.entry).context("invalid entry rule configuration")?,
        );
        let trailing = Arc::new(
            TrailingLadder::from_settings(&settings.trailing)
                .context("invalid trailing ladder configuration")?,
        );
        let targets = Arc::new(
            TargetLadder::from_settings(&settings.targets)
                .context("invalid target ladder configuration")?,
        );

        let governor = Arc::new(RiskGovernor::new());
        for client in roster.clients.iter().filter(|c| c.enabled) {
            let limits = client
                .risk_limits()
                .with_context(|| format!("invalid limits for client {}", client.id))?;
            governor.register(ClientId(client.id.clone()), limits);
        }

        let (commands, _) = broadcast::channel(64);
        Ok(Self {
            settings,
            roster,
            rule,
            trailing,
            targets,
            governor,
            feed,
            registry,
            gateway,
            store,
            commands,
            events,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            governor: self.governor.clone(),
            commands: self.commands.clone(),
            events: self.events.clone(),
        }
    }

    /// Runs the session to completion: reconciles persisted state against
    /// the venue, spawns the pair workers and tick routers, and waits for
    /// the tick streams to drain.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            feed = self.feed.name(),
            gateway = self.gateway.name(),
            rule = self.rule.name(),
            clients = self.roster.clients.iter().filter(|c| c.enabled).count(),
            "Engine starting."
        );

        let reconciler = Reconciler::new(
            self.gateway.as_ref(),
            self.store.as_ref(),
            self.governor.as_ref(),
        );

        // sinks[instrument] -> the tick sender of every pair watching it
        let mut sinks: HashMap<InstrumentId, Vec<mpsc::Sender<Tick>>> = HashMap::new();
        let mut workers = Vec::new();
        let mut kill_engaged = Vec::new();

        for client_cfg in self.roster.clients.iter().filter(|c| c.enabled) {
            let client = ClientId(client_cfg.id.clone());
            let mut resumed = reconciler
                .resume_client(&client)
                .await
                .with_context(|| format!("reconciliation failed for client {client}"))?;
            if !self.governor.is_trading_allowed(&client) {
                kill_engaged.push(client.clone());
            }

            let instruments = self
                .registry
                .active_instruments(&client)
                .await
                .with_context(|| format!("no watchlist for client {client}"))?;
            for instrument_id in instruments {
                let day_open = self
                    .registry
                    .day_open(&instrument_id)
                    .await
                    .with_context(|| format!("no day open for {instrument_id}"))?;

                let cfg = PairConfig {
                    client: client.clone(),
                    sizing: client_cfg.sizing.clone(),
                    limits: client_cfg.risk_limits()?,
                    session: self.settings.session.clone(),
                    gateway: self.settings.gateway.clone(),
                };
                let seed = resumed.remove(&instrument_id);
                let worker = PairWorker::new(
                    cfg,
                    Instrument::new(instrument_id.clone(), day_open),
                    self.rule.clone(),
                    self.trailing.clone(),
                    self.targets.clone(),
                    self.governor.clone(),
                    self.gateway.clone(),
                    self.store.clone(),
                    self.events.clone(),
                    self.commands.clone(),
                    seed,
                );

                let (tick_tx, tick_rx) = mpsc::channel(1024);
                sinks.entry(instrument_id).or_default().push(tick_tx);
                let commands = self.commands.subscribe();
                workers.push(tokio::spawn(worker.run(tick_rx, commands)));
            }

            for (instrument, snapshot) in resumed {
                warn!(
                    client = %client,
                    instrument = %instrument,
                    status = ?snapshot.position.status,
                    "Persisted position for an instrument no longer on the watchlist."
                );
            }
        }

        // An engaged switch means no trading at all, including anything the
        // reconciler resumed. The workers are subscribed by now, so the
        // command reaches every pair before its first tick.
        for client in kill_engaged {
            warn!(client = %client, "Kill switch engaged at startup. Flattening the client.");
            let _ = self.commands.send(EngineCommand::ForceFlatten {
                client: Some(client),
                reason: FlattenReason::KillSwitch,
            });
        }

        let routers: Vec<_> = sinks
            .into_iter()
            .map(|(instrument, pair_sinks)| {
                tokio::spawn(route_instrument(
                    self.feed.clone(),
                    instrument,
                    pair_sinks,
                ))
            })
            .collect();

        for result in join_all(routers).await {
            if let Err(err) = result {
                error!(error = %err, "Tick router task failed.");
            }
        }
        for result in join_all(workers).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(error = %err, "Pair worker failed."),
                Err(err) => error!(error = %err, "Pair worker task panicked."),
            }
        }
        info!("Engine stopped.");
        Ok(())
    }
}

/// Subscribes to one instrument's tick stream and fans it out, in order, to
/// every pair watching the instrument. An errored stream is resubscribed
/// with capped exponential backoff; a cleanly ended stream ends the session
/// for the instrument.
async fn route_instrument(
    feed: Arc<dyn TickFeed>,
    instrument: InstrumentId,
    sinks: Vec<mpsc::Sender<Tick>>,
) {
    let mut backoff = Duration::from_millis(500);
    loop {
        let mut stream = match feed.subscribe(&instrument).await {
            Ok(stream) => {
                backoff = Duration::from_millis(500);
                stream
            }
            Err(feed::Error::UnknownInstrument(id)) => {
                error!(instrument = %id, "Feed does not know the instrument. Giving up.");
                return;
            }
            Err(err) => {
                warn!(instrument = %instrument, error = %err, "Subscription failed. Retrying.");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(10));
                continue;
            }
        };

        let mut disconnected = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(tick) => {
                    for sink in &sinks {
                        // A closed sink means its worker is gone; the rest
                        // still get the tick.
                        let _ = sink.send(tick.clone()).await;
                    }
                }
                Err(err) => {
                    warn!(
                        instrument = %instrument,
                        error = %err,
                        "Tick stream dropped. Resubscribing."
                    );
                    disconnected = true;
                    break;
                }
            }
        }
        if !disconnected {
            info!(instrument = %instrument, "Tick stream ended.");
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_secs(10));
    }
}

/// Wall-clock time at the exchange for a UTC instant. The exchange timezone
/// is a fixed offset; the range is validated at configuration load.
pub(crate) fn exchange_local_time(at: DateTime<Utc>, offset_minutes: i32) -> NaiveTime {
    let offset =
        FixedOffset::east_opt(offset_minutes * 60).expect("offset validated at config load");
    at.with_timezone(&offset).time()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn exchange_local_time_applies_the_offset() {
        let at = Utc.with_ymd_and_hms(2025, 1, 6, 9, 45, 0).unwrap();
        // +05:30 puts 09:45 UTC at 15:15 local.
        assert_eq!(
            exchange_local_time(at, 330),
            NaiveTime::from_hms_opt(15, 15, 0).unwrap()
        );
        assert_eq!(
            exchange_local_time(at, 0),
            NaiveTime::from_hms_opt(9, 45, 0).unwrap()
        );
    }
}
