use crate::{EngineCommand, FlattenReason, exchange_local_time};
use app_config::SessionSettings;
use chrono::{DateTime, Utc};
use core_types::{
    ClientId, EntrySignal, Instrument, InstrumentId, OrderAck, OrderStatus, OrderTicket, Position,
    PositionStatus, RiskLimits, Side, Tick,
};
use events::EngineEvent;
use execution::{GatewaySettings, OrderGateway, new_token, submit_with_retry};
use ladders::{TargetFire, TargetLadder, TargetLadderState, TrailingLadder, TrailingStopState, TrailingUpdate};
use risk::{RiskGovernor, RiskVerdict};
use rules::{EntryRule, Sizing};
use rust_decimal::Decimal;
use state_store::{PositionSnapshot, RiskSnapshot, StateStore};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Per-pair configuration resolved from the roster and global settings.
#[derive(Debug, Clone)]
pub(crate) struct PairConfig {
    pub client: ClientId,
    pub sizing: Sizing,
    pub limits: RiskLimits,
    pub session: SessionSettings,
    pub gateway: GatewaySettings,
}

/// Owns the position state machine for one (client, instrument) pair.
///
/// Each pair runs as its own task and is the only writer of its position, so
/// decisions within the pair are strictly sequential: a tick is fully decided
/// and its state transition persisted before the next tick is looked at.
pub(crate) struct PairWorker {
    cfg: PairConfig,
    instrument: Instrument,
    rule: Arc<dyn EntryRule>,
    trailing_ladder: Arc<TrailingLadder>,
    target_ladder: Arc<TargetLadder>,
    governor: Arc<RiskGovernor>,
    gateway: Arc<dyn OrderGateway>,
    store: Arc<dyn StateStore>,
    events: broadcast::Sender<EngineEvent>,
    commands: broadcast::Sender<EngineCommand>,
    position: Position,
    trailing: Option<TrailingStopState>,
    targets: TargetLadderState,
    /// Venue order id of a live, not-yet-terminal order.
    pending_order: Option<String>,
    /// Set once the pair is done for the day (square-off, kill switch,
    /// stuck). A halted pair ignores further entry signals.
    halted: bool,
}

impl PairWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        cfg: PairConfig,
        instrument: Instrument,
        rule: Arc<dyn EntryRule>,
        trailing_ladder: Arc<TrailingLadder>,
        target_ladder: Arc<TargetLadder>,
        governor: Arc<RiskGovernor>,
        gateway: Arc<dyn OrderGateway>,
        store: Arc<dyn StateStore>,
        events: broadcast::Sender<EngineEvent>,
        commands: broadcast::Sender<EngineCommand>,
        seed: Option<PositionSnapshot>,
    ) -> Self {
        let (position, trailing, targets) = match seed {
            Some(snapshot) => (snapshot.position, snapshot.trailing, snapshot.targets),
            None => (
                Self::flat_position(&cfg.client, &instrument.id),
                None,
                TargetLadderState::default(),
            ),
        };
        let halted = position.status == PositionStatus::Stuck;
        Self {
            cfg,
            instrument,
            rule,
            trailing_ladder,
            target_ladder,
            governor,
            gateway,
            store,
            events,
            commands,
            position,
            trailing,
            targets,
            pending_order: None,
            halted,
        }
    }

    fn flat_position(client: &ClientId, instrument: &InstrumentId) -> Position {
        Position {
            client: client.clone(),
            instrument: instrument.clone(),
            side: Side::Long,
            entry_price: Decimal::ZERO,
            quantity: Decimal::ZERO,
            status: PositionStatus::Flat,
            opened_at: None,
        }
    }

    /// The pair's main loop. Commands are drained before ticks so a
    /// flatten is never delayed behind queued market data.
    pub(crate) async fn run(
        mut self,
        mut ticks: mpsc::Receiver<Tick>,
        mut commands: broadcast::Receiver<EngineCommand>,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                biased;
                cmd = commands.recv() => match cmd {
                    Ok(EngineCommand::ForceFlatten { client, reason }) => {
                        let applies = client.as_ref().is_none_or(|c| *c == self.cfg.client);
                        if applies {
                            self.force_flatten(reason).await?;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(
                            client = %self.cfg.client,
                            instrument = %self.instrument.id,
                            missed,
                            "Command channel lagged."
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                tick = ticks.recv() => match tick {
                    Some(tick) => self.on_tick(tick).await?,
                    None => break,
                },
            }
        }
        Ok(())
    }

    pub(crate) async fn on_tick(&mut self, tick: Tick) -> anyhow::Result<()> {
        self.instrument.apply_tick(&tick);
        self.gateway.note_tick(&tick.instrument, tick.price);
        match self.position.status {
            PositionStatus::Flat => self.try_enter(&tick).await,
            PositionStatus::Open => self.manage_open(tick.price).await,
            // Pending and Exiting are transient within a decision; a parked
            // live order is only resolved by a command. Closed and Stuck
            // ignore market data.
            _ => Ok(()),
        }
    }

    fn entry_window_open(&self, at: DateTime<Utc>) -> bool {
        exchange_local_time(at, self.cfg.session.exchange_utc_offset_minutes)
            <= self.cfg.session.no_new_entry_after
    }

    // --- 1. Entry ---

    async fn try_enter(&mut self, tick: &Tick) -> anyhow::Result<()> {
        if self.halted || !self.entry_window_open(tick.timestamp) {
            return Ok(());
        }
        // The tick's own timestamp is the evaluation clock here; the rule's
        // staleness guard only bites on evaluations made off the tick path.
        let signal = self
            .rule
            .evaluate(&self.instrument, tick.timestamp, &self.cfg.sizing);
        let (side, quantity, strength) = match signal {
            EntrySignal::EnterLong {
                quantity, strength, ..
            } => (Side::Long, quantity, strength),
            EntrySignal::EnterShort {
                quantity, strength, ..
            } => (Side::Short, quantity, strength),
            EntrySignal::NoSignal => return Ok(()),
        };

        // The permit is the last word before the wire; it is re-checked
        // after the gateway call returns.
        let permit = match self.governor.permit(&self.cfg.client) {
            Ok(permit) => permit,
            Err(risk::Error::Vetoed { .. }) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        info!(
            client = %self.cfg.client,
            instrument = %self.instrument.id,
            side = ?side,
            quantity = %quantity,
            strength,
            price = %tick.price,
            "Entry signal. Submitting order."
        );

        let ticket = OrderTicket {
            instrument: self.instrument.id.clone(),
            side,
            quantity,
            price: None,
            token: new_token(),
        };
        self.position = Position {
            client: self.cfg.client.clone(),
            instrument: self.instrument.id.clone(),
            side,
            entry_price: tick.price,
            quantity,
            status: PositionStatus::Pending,
            opened_at: None,
        };
        self.persist().await?;

        match submit_with_retry(
            self.gateway.as_ref(),
            &self.cfg.client,
            &ticket,
            &self.cfg.gateway,
        )
        .await
        {
            Ok(ack) => {
                if permit.is_stale() {
                    warn!(
                        client = %self.cfg.client,
                        instrument = %self.instrument.id,
                        order_id = %ack.order_id,
                        "Kill switch engaged while the entry was in flight. Unwinding."
                    );
                    return self.unwind_inflight_entry(&ack, side).await;
                }
                self.apply_entry_ack(&ack, tick.price).await
            }
            Err(execution::Error::Rejected { reason }) => {
                warn!(
                    client = %self.cfg.client,
                    instrument = %self.instrument.id,
                    %reason,
                    "Entry rejected by the venue. Back to flat."
                );
                self.reset_flat().await
            }
            Err(execution::Error::Timeout { token, attempts }) => {
                self.mark_stuck(token, attempts).await
            }
            Err(err) => {
                error!(
                    client = %self.cfg.client,
                    instrument = %self.instrument.id,
                    error = %err,
                    "Entry submission failed after retries."
                );
                self.mark_stuck(ticket.token.clone(), self.cfg.gateway.max_attempts)
                    .await
            }
        }
    }

    async fn apply_entry_ack(&mut self, ack: &OrderAck, reference: Decimal) -> anyhow::Result<()> {
        match ack.status {
            OrderStatus::Filled | OrderStatus::PartiallyFilled => {
                let entry_price = ack.fill_price.unwrap_or(reference);
                self.position.entry_price = entry_price;
                self.position.quantity = ack.filled_quantity;
                self.position.status = PositionStatus::Open;
                self.position.opened_at = Some(Utc::now());
                self.trailing = Some(self.trailing_ladder.open(self.position.side, entry_price));
                self.targets = TargetLadderState::default();
                info!(
                    client = %self.cfg.client,
                    instrument = %self.instrument.id,
                    side = ?self.position.side,
                    price = %entry_price,
                    quantity = %ack.filled_quantity,
                    "Position opened."
                );
                let _ = self.events.send(EngineEvent::PositionOpened {
                    client: self.cfg.client.clone(),
                    instrument: self.instrument.id.clone(),
                    side: self.position.side,
                    price: entry_price,
                    quantity: ack.filled_quantity,
                });
                self.persist().await
            }
            OrderStatus::Rejected | OrderStatus::Failed => {
                warn!(
                    client = %self.cfg.client,
                    instrument = %self.instrument.id,
                    order_id = %ack.order_id,
                    "Entry order did not fill. Back to flat."
                );
                self.reset_flat().await
            }
            OrderStatus::Submitted | OrderStatus::Acknowledged => {
                // Live but unfilled. The pair parks until a command resolves
                // it; a live adapter normally returns a terminal status.
                self.pending_order = Some(ack.order_id.clone());
                self.persist().await
            }
        }
    }

    /// The kill switch flipped while an entry order was on the wire. Whatever
    /// the venue did with it has to be undone: cancel if still working,
    /// flatten straight back out if it already filled.
    async fn unwind_inflight_entry(&mut self, ack: &OrderAck, side: Side) -> anyhow::Result<()> {
        if ack.filled_quantity > Decimal::ZERO {
            let ticket = OrderTicket {
                instrument: self.instrument.id.clone(),
                side: side.closing(),
                quantity: ack.filled_quantity,
                price: None,
                token: new_token(),
            };
            match submit_with_retry(
                self.gateway.as_ref(),
                &self.cfg.client,
                &ticket,
                &self.cfg.gateway,
            )
            .await
            {
                Ok(exit_ack) => {
                    let entry = ack.fill_price.unwrap_or(self.instrument.last_price);
                    let exit = exit_ack.fill_price.unwrap_or(self.instrument.last_price);
                    let per_unit = match side {
                        Side::Long => exit - entry,
                        Side::Short => entry - exit,
                    };
                    self.apply_realized(per_unit * ack.filled_quantity).await?;
                }
                Err(err) => {
                    error!(
                        client = %self.cfg.client,
                        instrument = %self.instrument.id,
                        error = %err,
                        "Unwind of an in-flight entry failed."
                    );
                    return self
                        .mark_stuck(ticket.token.clone(), self.cfg.gateway.max_attempts)
                        .await;
                }
            }
        } else if let Err(err) = self.gateway.cancel(&self.cfg.client, &ack.order_id).await {
            warn!(
                client = %self.cfg.client,
                order_id = %ack.order_id,
                error = %err,
                "Cancel of an in-flight entry failed."
            );
        }
        self.halted = true;
        self.position.status = PositionStatus::Closed;
        self.position.quantity = Decimal::ZERO;
        self.persist().await
    }

    // --- 2. Open position management ---

    async fn manage_open(&mut self, price: Decimal) -> anyhow::Result<()> {
        if self.trailing.is_none() {
            // A reconciled position without stop state; re-anchor at entry.
            self.trailing = Some(
                self.trailing_ladder
                    .open(self.position.side, self.position.entry_price),
            );
        }
        let update = {
            let state = self
                .trailing
                .as_mut()
                .expect("trailing state exists for an open position");
            self.trailing_ladder.on_tick(state, price)
        };
        match update {
            TrailingUpdate::StopHit { stop_price } => {
                info!(
                    client = %self.cfg.client,
                    instrument = %self.instrument.id,
                    %price,
                    %stop_price,
                    "Trailing stop hit."
                );
                return self.exit_remaining(price, "trailing stop").await;
            }
            TrailingUpdate::Advanced { level, stop_price } => {
                debug!(
                    client = %self.cfg.client,
                    instrument = %self.instrument.id,
                    level,
                    %stop_price,
                    "Trailing stop advanced."
                );
                let _ = self.events.send(EngineEvent::StopAdvanced {
                    client: self.cfg.client.clone(),
                    instrument: self.instrument.id.clone(),
                    level,
                    stop_price,
                });
            }
            TrailingUpdate::Hold => {}
        }

        let fires = {
            let side = self.position.side;
            let entry = self.position.entry_price;
            let remaining = self.position.quantity;
            self.target_ladder
                .on_tick(&mut self.targets, side, entry, remaining, price)
        };
        for fire in fires {
            self.exit_partial(&fire, price).await?;
            if self.position.status != PositionStatus::Open {
                return Ok(());
            }
        }
        if self.position.status == PositionStatus::Open {
            self.persist().await?;
        }
        Ok(())
    }

    // --- 3. Exits ---

    /// Submits a closing order and returns its ack, or `None` after marking
    /// the pair stuck.
    async fn submit_exit(&mut self, quantity: Decimal, label: &str) -> anyhow::Result<Option<OrderAck>> {
        let ticket = OrderTicket {
            instrument: self.instrument.id.clone(),
            side: self.position.side.closing(),
            quantity,
            price: None,
            token: new_token(),
        };
        self.position.status = PositionStatus::Exiting;
        self.persist().await?;
        match submit_with_retry(
            self.gateway.as_ref(),
            &self.cfg.client,
            &ticket,
            &self.cfg.gateway,
        )
        .await
        {
            Ok(ack)
                if matches!(
                    ack.status,
                    OrderStatus::Filled | OrderStatus::PartiallyFilled
                ) =>
            {
                Ok(Some(ack))
            }
            Ok(ack) => {
                error!(
                    client = %self.cfg.client,
                    instrument = %self.instrument.id,
                    status = ?ack.status,
                    label,
                    "Exit order did not fill."
                );
                self.mark_stuck(ticket.token.clone(), 1).await?;
                Ok(None)
            }
            Err(execution::Error::Timeout { token, attempts }) => {
                self.mark_stuck(token, attempts).await?;
                Ok(None)
            }
            Err(err) => {
                error!(
                    client = %self.cfg.client,
                    instrument = %self.instrument.id,
                    error = %err,
                    label,
                    "Exit submission failed after retries."
                );
                self.mark_stuck(ticket.token.clone(), self.cfg.gateway.max_attempts)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn exit_partial(&mut self, fire: &TargetFire, price: Decimal) -> anyhow::Result<()> {
        let Some(ack) = self.submit_exit(fire.quantity, "target").await? else {
            return Ok(());
        };
        let fill = ack.fill_price.unwrap_or(price);
        let booked = ack.filled_quantity.min(fire.quantity);
        let per_unit = match self.position.side {
            Side::Long => fill - self.position.entry_price,
            Side::Short => self.position.entry_price - fill,
        };
        self.position.quantity -= booked;
        self.apply_realized(per_unit * booked).await?;
        info!(
            client = %self.cfg.client,
            instrument = %self.instrument.id,
            level = fire.level,
            price = %fill,
            quantity = %booked,
            remaining = %self.position.quantity,
            "Target level booked."
        );
        let _ = self.events.send(EngineEvent::PartialExit {
            client: self.cfg.client.clone(),
            instrument: self.instrument.id.clone(),
            level: fire.level,
            price: fill,
            quantity: booked,
        });
        if self.position.quantity <= Decimal::ZERO {
            self.close_out(fill, "target ladder complete").await
        } else {
            self.position.status = PositionStatus::Open;
            self.persist().await
        }
    }

    async fn exit_remaining(&mut self, price: Decimal, reason: &str) -> anyhow::Result<()> {
        let quantity = self.position.quantity;
        if quantity <= Decimal::ZERO {
            return self.close_out(price, reason).await;
        }
        let Some(ack) = self.submit_exit(quantity, reason).await? else {
            return Ok(());
        };
        let fill = ack.fill_price.unwrap_or(price);
        let booked = ack.filled_quantity.min(quantity);
        let per_unit = match self.position.side {
            Side::Long => fill - self.position.entry_price,
            Side::Short => self.position.entry_price - fill,
        };
        self.position.quantity -= booked;
        self.apply_realized(per_unit * booked).await?;
        if self.position.quantity > Decimal::ZERO {
            // A partial fill on a full exit leaves the rest open and still
            // guarded by the stop.
            warn!(
                client = %self.cfg.client,
                instrument = %self.instrument.id,
                remaining = %self.position.quantity,
                "Full exit only partially filled."
            );
            self.position.status = PositionStatus::Open;
            self.persist().await
        } else {
            self.close_out(fill, reason).await
        }
    }

    async fn close_out(&mut self, price: Decimal, reason: &str) -> anyhow::Result<()> {
        self.position.status = PositionStatus::Closed;
        self.position.quantity = Decimal::ZERO;
        let realized = self.governor.realized(&self.cfg.client)?;
        info!(
            client = %self.cfg.client,
            instrument = %self.instrument.id,
            %price,
            realized = %realized,
            reason,
            "Position closed."
        );
        let _ = self.events.send(EngineEvent::PositionClosed {
            client: self.cfg.client.clone(),
            instrument: self.instrument.id.clone(),
            price,
            realized_pnl: realized,
            reason: reason.to_string(),
        });
        self.persist().await?;
        if !self.halted {
            // The closed position is done; the pair starts a fresh entity
            // and may re-enter if the rule fires again.
            self.reset_flat().await?;
        }
        Ok(())
    }

    // --- 4. Risk and bookkeeping ---

    async fn apply_realized(&mut self, delta: Decimal) -> anyhow::Result<()> {
        let verdict = self.governor.record_realized(&self.cfg.client, delta)?;
        self.save_risk().await?;
        if let RiskVerdict::Breached { realized } = verdict {
            error!(
                client = %self.cfg.client,
                realized = %realized,
                "Daily P&L limit breached. Flattening the client."
            );
            let _ = self.events.send(EngineEvent::RiskBreach {
                client: self.cfg.client.clone(),
                realized_pnl: realized,
            });
            let _ = self.events.send(EngineEvent::KillSwitchEngaged {
                client: self.cfg.client.clone(),
                reason: "daily P&L limit breached".to_string(),
            });
            let _ = self.commands.send(EngineCommand::ForceFlatten {
                client: Some(self.cfg.client.clone()),
                reason: FlattenReason::RiskBreach,
            });
            self.halted = true;
        }
        Ok(())
    }

    async fn save_risk(&self) -> anyhow::Result<()> {
        let snapshot = RiskSnapshot {
            limits: self.cfg.limits.clone(),
            realized_pnl: self.governor.realized(&self.cfg.client)?,
            kill_switch_engaged: !self.governor.is_trading_allowed(&self.cfg.client),
        };
        self.store
            .save_risk_state(&self.cfg.client, &snapshot)
            .await?;
        Ok(())
    }

    async fn mark_stuck(
        &mut self,
        token: core_types::IdempotencyToken,
        attempts: u32,
    ) -> anyhow::Result<()> {
        self.position.status = PositionStatus::Stuck;
        self.halted = true;
        error!(
            client = %self.cfg.client,
            instrument = %self.instrument.id,
            %token,
            attempts,
            "Retries exhausted. Pair needs operator attention."
        );
        let _ = self.events.send(EngineEvent::OrderStuck {
            client: self.cfg.client.clone(),
            instrument: self.instrument.id.clone(),
            token,
            attempts,
        });
        self.persist().await
    }

    async fn reset_flat(&mut self) -> anyhow::Result<()> {
        self.store
            .clear_position(&self.cfg.client, &self.instrument.id)
            .await?;
        self.position = Self::flat_position(&self.cfg.client, &self.instrument.id);
        self.trailing = None;
        self.targets = TargetLadderState::default();
        self.pending_order = None;
        Ok(())
    }

    async fn persist(&self) -> anyhow::Result<()> {
        let snapshot = PositionSnapshot {
            position: self.position.clone(),
            trailing: self.trailing.clone(),
            targets: self.targets.clone(),
            updated_at: Utc::now(),
        };
        self.store.save_position_state(&snapshot).await?;
        Ok(())
    }

    // --- 5. Forced flattening ---

    pub(crate) async fn force_flatten(&mut self, reason: FlattenReason) -> anyhow::Result<()> {
        self.halted = true;
        match self.position.status {
            PositionStatus::Pending => {
                if let Some(order_id) = self.pending_order.take() {
                    match self.gateway.cancel(&self.cfg.client, &order_id).await {
                        Ok(status) => info!(
                            client = %self.cfg.client,
                            %order_id,
                            status = ?status,
                            "Pending order cancelled."
                        ),
                        Err(err) => warn!(
                            client = %self.cfg.client,
                            %order_id,
                            error = %err,
                            "Cancel of a pending order failed."
                        ),
                    }
                }
                self.position.status = PositionStatus::Closed;
                self.position.quantity = Decimal::ZERO;
                self.persist().await
            }
            PositionStatus::Open | PositionStatus::Exiting => {
                self.exit_remaining(self.instrument.last_price, reason.as_str())
                    .await
            }
            // Flat pairs just stop taking entries; Closed and Stuck stay put.
            _ => Ok(()),
        }
    }

    #[cfg(test)]
    pub(crate) fn status(&self) -> PositionStatus {
        self.position.status
    }

    #[cfg(test)]
    pub(crate) fn position(&self) -> &Position {
        &self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use async_trait::async_trait;
    use execution::{PaperGateway, PaperSettings};
    use ladders::{TargetLadderSettings, TargetLevelSettings, TrailingLadderSettings};
    use rules::DayRangeSettings;
    use rules::day_range::DayRangeRule;
    use rust_decimal_macros::dec;
    use state_store::MemoryStore;
    use std::sync::Mutex;

    struct Harness {
        worker: PairWorker,
        gateway: Arc<PaperGateway>,
        store: Arc<MemoryStore>,
        governor: Arc<RiskGovernor>,
        events: broadcast::Receiver<EngineEvent>,
        commands: broadcast::Receiver<EngineCommand>,
    }

    fn harness(targets: TargetLadderSettings, limits: RiskLimits) -> Harness {
        let client = ClientId("c1".to_string());
        let instrument_id = InstrumentId("NSE:ACME".to_string());
        let governor = Arc::new(RiskGovernor::new());
        governor.register(client.clone(), limits.clone());

        let gateway = Arc::new(PaperGateway::new(PaperSettings { slippage_pct: 0.0 }));
        let store = Arc::new(MemoryStore::new());
        let (event_tx, event_rx) = broadcast::channel(64);
        let (cmd_tx, cmd_rx) = broadcast::channel(16);

        let cfg = PairConfig {
            client,
            sizing: Sizing::Quantity(dec!(10)),
            limits,
            session: SessionSettings::default(),
            gateway: GatewaySettings::default(),
        };
        let worker = PairWorker::new(
            cfg,
            Instrument::new(instrument_id, dec!(100)),
            Arc::new(DayRangeRule::new(&DayRangeSettings::default()).unwrap()),
            Arc::new(TrailingLadder::from_settings(&TrailingLadderSettings::default()).unwrap()),
            Arc::new(TargetLadder::from_settings(&targets).unwrap()),
            governor.clone(),
            gateway.clone(),
            store.clone(),
            event_tx,
            cmd_tx,
            None,
        );
        Harness {
            worker,
            gateway,
            store,
            governor,
            events: event_rx,
            commands: cmd_rx,
        }
    }

    /// A target ladder too far away to fire in these scenarios.
    fn distant_targets() -> TargetLadderSettings {
        TargetLadderSettings {
            levels: vec![TargetLevelSettings {
                move_pct: 50.0,
                fraction: 1.0,
            }],
        }
    }

    fn wide_limits() -> RiskLimits {
        RiskLimits {
            max_daily_loss: dec!(-100000),
            max_daily_profit: dec!(100000),
        }
    }

    fn tick(price: Decimal) -> Tick {
        Tick {
            instrument: InstrumentId("NSE:ACME".to_string()),
            price,
            // 10:30 exchange-local, well inside the entry window.
            timestamp: Utc.with_ymd_and_hms(2025, 1, 6, 5, 0, 0).unwrap(),
        }
    }

    fn late_tick(price: Decimal) -> Tick {
        Tick {
            instrument: InstrumentId("NSE:ACME".to_string()),
            price,
            // 15:31 exchange-local, past the entry cutoff.
            timestamp: Utc.with_ymd_and_hms(2025, 1, 6, 10, 1, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn enters_trails_and_exits_on_stop() {
        let mut h = harness(distant_targets(), wide_limits());
        let client = ClientId("c1".to_string());

        h.worker.on_tick(tick(dec!(100))).await.unwrap();
        assert_eq!(h.worker.status(), PositionStatus::Flat);

        // +8% from the day open crosses the first threshold.
        h.worker.on_tick(tick(dec!(108))).await.unwrap();
        assert_eq!(h.worker.status(), PositionStatus::Open);
        assert_eq!(h.worker.position().entry_price, dec!(108));
        assert_eq!(h.worker.position().quantity, dec!(10));

        // 115 is +6.48% favorable: level 6, stop at 115 * 0.975.
        h.worker.on_tick(tick(dec!(115))).await.unwrap();
        assert_eq!(h.worker.status(), PositionStatus::Open);

        // 110 breaches the tightened stop and the position closes.
        h.worker.on_tick(tick(dec!(110))).await.unwrap();
        assert_eq!(h.governor.realized(&client).unwrap(), dec!(20));
        // Closed positions are cleared and the pair starts a new entity.
        assert_eq!(h.worker.status(), PositionStatus::Flat);
        assert_eq!(h.store.position_count().await, 0);
        assert_eq!(
            h.gateway
                .open_quantity(&client, &InstrumentId("NSE:ACME".to_string()))
                .await
                .unwrap(),
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn books_targets_in_order_until_exhausted() {
        let targets = TargetLadderSettings {
            levels: vec![
                TargetLevelSettings {
                    move_pct: 1.0,
                    fraction: 0.5,
                },
                TargetLevelSettings {
                    move_pct: 2.0,
                    fraction: 1.0,
                },
            ],
        };
        let mut h = harness(targets, wide_limits());
        let client = ClientId("c1".to_string());

        h.worker.on_tick(tick(dec!(108))).await.unwrap();
        assert_eq!(h.worker.status(), PositionStatus::Open);

        // +1.85% from entry fires only the first target: half of 10.
        h.worker.on_tick(tick(dec!(110))).await.unwrap();
        assert_eq!(h.worker.status(), PositionStatus::Open);
        assert_eq!(h.worker.position().quantity, dec!(5));
        assert_eq!(h.governor.realized(&client).unwrap(), dec!(10));

        // +2.78% fires the final target and closes the position.
        h.worker.on_tick(tick(dec!(111))).await.unwrap();
        assert_eq!(h.governor.realized(&client).unwrap(), dec!(25));
        assert_eq!(h.worker.status(), PositionStatus::Flat);
    }

    #[tokio::test]
    async fn kill_switch_blocks_entries() {
        let mut h = harness(distant_targets(), wide_limits());
        let client = ClientId("c1".to_string());
        h.governor.set_kill_switch(&client, true).unwrap();

        h.worker.on_tick(tick(dec!(108))).await.unwrap();
        assert_eq!(h.worker.status(), PositionStatus::Flat);
        assert_eq!(
            h.gateway
                .open_quantity(&client, &InstrumentId("NSE:ACME".to_string()))
                .await
                .unwrap(),
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn no_entries_after_the_cutoff() {
        let mut h = harness(distant_targets(), wide_limits());
        h.worker.on_tick(late_tick(dec!(108))).await.unwrap();
        assert_eq!(h.worker.status(), PositionStatus::Flat);
    }

    #[tokio::test]
    async fn loss_breach_engages_kill_switch_and_broadcasts_flatten() {
        let limits = RiskLimits {
            max_daily_loss: dec!(-10),
            max_daily_profit: dec!(100000),
        };
        let mut h = harness(distant_targets(), limits);
        let client = ClientId("c1".to_string());

        h.worker.on_tick(tick(dec!(108))).await.unwrap();
        // 101 breaches the initial 5% stop; the exit realizes -70.
        h.worker.on_tick(tick(dec!(101))).await.unwrap();

        assert_eq!(h.governor.realized(&client).unwrap(), dec!(-70));
        assert!(!h.governor.is_trading_allowed(&client));
        // The breach stays terminal: the pair does not start a new entity.
        assert_eq!(h.worker.status(), PositionStatus::Closed);

        let cmd = h.commands.try_recv().unwrap();
        assert!(matches!(
            cmd,
            EngineCommand::ForceFlatten {
                reason: FlattenReason::RiskBreach,
                ..
            }
        ));

        // A later signal is ignored.
        h.worker.on_tick(tick(dec!(112))).await.unwrap();
        assert_eq!(h.worker.status(), PositionStatus::Closed);

        let mut saw_breach = false;
        while let Ok(event) = h.events.try_recv() {
            if matches!(event, EngineEvent::RiskBreach { .. }) {
                saw_breach = true;
            }
        }
        assert!(saw_breach);
    }

    /// Acknowledges every order but never fills, so entries park live.
    struct RestingGateway {
        cancelled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OrderGateway for RestingGateway {
        fn name(&self) -> &'static str {
            "RestingGateway"
        }

        async fn submit(
            &self,
            _client: &ClientId,
            _ticket: &OrderTicket,
        ) -> execution::Result<OrderAck> {
            Ok(OrderAck {
                order_id: "rest-1".to_string(),
                status: OrderStatus::Acknowledged,
                filled_quantity: Decimal::ZERO,
                fill_price: None,
            })
        }

        async fn cancel(
            &self,
            _client: &ClientId,
            order_id: &str,
        ) -> execution::Result<OrderStatus> {
            self.cancelled.lock().unwrap().push(order_id.to_string());
            Ok(OrderStatus::Failed)
        }

        async fn open_quantity(
            &self,
            _client: &ClientId,
            _instrument: &InstrumentId,
        ) -> execution::Result<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    #[tokio::test]
    async fn flatten_cancels_a_parked_pending_order() {
        let client = ClientId("c1".to_string());
        let gateway = Arc::new(RestingGateway {
            cancelled: Mutex::new(Vec::new()),
        });
        let store = Arc::new(MemoryStore::new());
        let governor = Arc::new(RiskGovernor::new());
        governor.register(client.clone(), wide_limits());
        let (event_tx, _events) = broadcast::channel(64);
        let (cmd_tx, _commands) = broadcast::channel(16);

        let cfg = PairConfig {
            client: client.clone(),
            sizing: Sizing::Quantity(dec!(10)),
            limits: wide_limits(),
            session: SessionSettings::default(),
            gateway: GatewaySettings::default(),
        };
        let mut worker = PairWorker::new(
            cfg,
            Instrument::new(InstrumentId("NSE:ACME".to_string()), dec!(100)),
            Arc::new(DayRangeRule::new(&DayRangeSettings::default()).unwrap()),
            Arc::new(TrailingLadder::from_settings(&TrailingLadderSettings::default()).unwrap()),
            Arc::new(TargetLadder::from_settings(&distant_targets()).unwrap()),
            governor,
            gateway.clone(),
            store.clone(),
            event_tx,
            cmd_tx,
            None,
        );

        // The entry signal fires but the order only reaches Acknowledged.
        worker.on_tick(tick(dec!(108))).await.unwrap();
        assert_eq!(worker.status(), PositionStatus::Pending);

        worker.force_flatten(FlattenReason::KillSwitch).await.unwrap();
        assert_eq!(worker.status(), PositionStatus::Closed);
        // The parked order was actively cancelled at the venue.
        assert_eq!(
            *gateway.cancelled.lock().unwrap(),
            vec!["rest-1".to_string()]
        );
        let stored = store.load_positions(&client).await.unwrap();
        assert_eq!(stored[0].position.status, PositionStatus::Closed);
    }

    #[tokio::test]
    async fn force_flatten_closes_an_open_position() {
        let mut h = harness(distant_targets(), wide_limits());
        let client = ClientId("c1".to_string());

        h.worker.on_tick(tick(dec!(108))).await.unwrap();
        assert_eq!(h.worker.status(), PositionStatus::Open);

        h.worker
            .force_flatten(FlattenReason::SquareOff)
            .await
            .unwrap();
        assert_eq!(h.worker.status(), PositionStatus::Closed);
        assert_eq!(
            h.gateway
                .open_quantity(&client, &InstrumentId("NSE:ACME".to_string()))
                .await
                .unwrap(),
            Decimal::ZERO
        );

        // The day is over for this pair; a fresh signal does nothing.
        h.worker.on_tick(tick(dec!(112))).await.unwrap();
        assert_eq!(h.worker.status(), PositionStatus::Closed);
    }

    #[tokio::test]
    async fn persists_every_transition_before_the_next_tick() {
        let mut h = harness(distant_targets(), wide_limits());
        let client = ClientId("c1".to_string());

        h.worker.on_tick(tick(dec!(108))).await.unwrap();
        let stored = h.store.load_positions(&client).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].position.status, PositionStatus::Open);
        assert!(stored[0].trailing.is_some());

        h.worker.on_tick(tick(dec!(112))).await.unwrap();
        let stored = h.store.load_positions(&client).await.unwrap();
        // The advanced stop is durable before the next tick arrives.
        let trailing = stored[0].trailing.as_ref().unwrap();
        assert!(trailing.level > 0);
        assert_eq!(trailing.high_water, dec!(112));
    }
}
