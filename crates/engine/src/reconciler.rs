use core_types::{ClientId, InstrumentId, PositionStatus, Side};
use execution::OrderGateway;
use risk::RiskGovernor;
use rust_decimal::Decimal;
use state_store::{PositionSnapshot, StateStore};
use std::collections::HashMap;
use tracing::{info, warn};

/// Restores a client's state after a restart, treating the venue as the
/// source of truth.
///
/// Persisted snapshots tell the engine what it believed before it went down;
/// the gateway's open-quantity book tells it what actually happened. Where
/// the two disagree, the snapshot is adjusted to the venue's record.
pub struct Reconciler<'a> {
    gateway: &'a dyn OrderGateway,
    store: &'a dyn StateStore,
    governor: &'a RiskGovernor,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        gateway: &'a dyn OrderGateway,
        store: &'a dyn StateStore,
        governor: &'a RiskGovernor,
    ) -> Self {
        Self {
            gateway,
            store,
            governor,
        }
    }

    /// Rebuilds one client's risk accumulator and resumable positions.
    pub async fn resume_client(
        &self,
        client: &ClientId,
    ) -> anyhow::Result<HashMap<InstrumentId, PositionSnapshot>> {
        if let Some(risk) = self.store.load_risk_state(client).await? {
            self.governor
                .restore_realized(client, risk.realized_pnl)?;
            if risk.kill_switch_engaged {
                self.governor.set_kill_switch(client, true)?;
            }
            info!(
                client = %client,
                realized = %risk.realized_pnl,
                kill_switch = risk.kill_switch_engaged,
                "Risk state restored."
            );
        }

        let mut resumed = HashMap::new();
        for mut snapshot in self.store.load_positions(client).await? {
            let instrument = snapshot.position.instrument.clone();
            let venue = self.gateway.open_quantity(client, &instrument).await?;
            let venue_abs = venue.abs();
            let venue_side = if venue >= Decimal::ZERO {
                Side::Long
            } else {
                Side::Short
            };

            match snapshot.position.status {
                PositionStatus::Open | PositionStatus::Exiting => {
                    if venue_abs.is_zero() {
                        warn!(
                            client = %client,
                            instrument = %instrument,
                            "Snapshot says open but the venue is flat. Dropping."
                        );
                        self.store.clear_position(client, &instrument).await?;
                        continue;
                    }
                    if venue_abs != snapshot.position.quantity
                        || venue_side != snapshot.position.side
                    {
                        warn!(
                            client = %client,
                            instrument = %instrument,
                            local = %snapshot.position.quantity,
                            venue = %venue,
                            "Venue quantity differs from the snapshot. Trusting the venue."
                        );
                        snapshot.position.quantity = venue_abs;
                        if venue_side != snapshot.position.side {
                            snapshot.position.side = venue_side;
                            // The stop state no longer matches; the pair
                            // re-anchors it at the entry price.
                            snapshot.trailing = None;
                        }
                    }
                    resumed.insert(instrument, snapshot);
                }
                PositionStatus::Pending => {
                    // Crashed mid-submission; the venue knows whether the
                    // order landed.
                    if venue_abs.is_zero() {
                        info!(
                            client = %client,
                            instrument = %instrument,
                            "Pending order never reached the venue. Starting flat."
                        );
                        self.store.clear_position(client, &instrument).await?;
                        continue;
                    }
                    snapshot.position.status = PositionStatus::Open;
                    snapshot.position.quantity = venue_abs;
                    snapshot.position.side = venue_side;
                    snapshot.trailing = None;
                    resumed.insert(instrument, snapshot);
                }
                PositionStatus::Flat | PositionStatus::Closed => {
                    self.store.clear_position(client, &instrument).await?;
                }
                PositionStatus::Stuck => {
                    // Needs an operator; resumed as-is so it stays visible.
                    resumed.insert(instrument, snapshot);
                }
            }
        }
        Ok(resumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_types::{OrderTicket, Position, RiskLimits};
    use execution::{PaperGateway, PaperSettings, new_token};
    use ladders::TargetLadderState;
    use rust_decimal_macros::dec;
    use state_store::{MemoryStore, RiskSnapshot};

    fn snapshot(status: PositionStatus, quantity: Decimal) -> PositionSnapshot {
        PositionSnapshot {
            position: Position {
                client: ClientId("c1".into()),
                instrument: InstrumentId("NSE:ACME".into()),
                side: Side::Long,
                entry_price: dec!(108),
                quantity,
                status,
                opened_at: Some(Utc::now()),
            },
            trailing: None,
            targets: TargetLadderState::default(),
            updated_at: Utc::now(),
        }
    }

    fn governor() -> RiskGovernor {
        let governor = RiskGovernor::new();
        governor.register(ClientId("c1".into()), RiskLimits {
            max_daily_loss: dec!(-5000),
            max_daily_profit: dec!(10000),
        });
        governor
    }

    async fn fill_at_venue(gateway: &PaperGateway, quantity: Decimal) {
        let instrument = InstrumentId("NSE:ACME".into());
        gateway.set_quote(&instrument, dec!(108));
        gateway
            .submit(&ClientId("c1".into()), &OrderTicket {
                instrument,
                side: Side::Long,
                quantity,
                price: None,
                token: new_token(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn open_snapshot_with_flat_venue_is_dropped() {
        let gateway = PaperGateway::new(PaperSettings::default());
        let store = MemoryStore::new();
        let governor = governor();
        store
            .save_position_state(&snapshot(PositionStatus::Open, dec!(10)))
            .await
            .unwrap();

        let reconciler = Reconciler::new(&gateway, &store, &governor);
        let resumed = reconciler
            .resume_client(&ClientId("c1".into()))
            .await
            .unwrap();
        assert!(resumed.is_empty());
        assert_eq!(store.position_count().await, 0);
    }

    #[tokio::test]
    async fn venue_quantity_overrides_the_snapshot() {
        let gateway = PaperGateway::new(PaperSettings::default());
        let store = MemoryStore::new();
        let governor = governor();
        fill_at_venue(&gateway, dec!(6)).await;
        store
            .save_position_state(&snapshot(PositionStatus::Open, dec!(10)))
            .await
            .unwrap();

        let reconciler = Reconciler::new(&gateway, &store, &governor);
        let resumed = reconciler
            .resume_client(&ClientId("c1".into()))
            .await
            .unwrap();
        let resumed = &resumed[&InstrumentId("NSE:ACME".into())];
        assert_eq!(resumed.position.quantity, dec!(6));
        assert_eq!(resumed.position.status, PositionStatus::Open);
    }

    #[tokio::test]
    async fn pending_snapshot_becomes_open_when_the_order_landed() {
        let gateway = PaperGateway::new(PaperSettings::default());
        let store = MemoryStore::new();
        let governor = governor();
        fill_at_venue(&gateway, dec!(10)).await;
        store
            .save_position_state(&snapshot(PositionStatus::Pending, dec!(10)))
            .await
            .unwrap();

        let reconciler = Reconciler::new(&gateway, &store, &governor);
        let resumed = reconciler
            .resume_client(&ClientId("c1".into()))
            .await
            .unwrap();
        let resumed = &resumed[&InstrumentId("NSE:ACME".into())];
        assert_eq!(resumed.position.status, PositionStatus::Open);
        assert_eq!(resumed.position.quantity, dec!(10));
    }

    #[tokio::test]
    async fn pending_snapshot_with_flat_venue_starts_over() {
        let gateway = PaperGateway::new(PaperSettings::default());
        let store = MemoryStore::new();
        let governor = governor();
        store
            .save_position_state(&snapshot(PositionStatus::Pending, dec!(10)))
            .await
            .unwrap();

        let reconciler = Reconciler::new(&gateway, &store, &governor);
        let resumed = reconciler
            .resume_client(&ClientId("c1".into()))
            .await
            .unwrap();
        assert!(resumed.is_empty());
        assert_eq!(store.position_count().await, 0);
    }

    #[tokio::test]
    async fn risk_state_is_restored_including_the_kill_switch() {
        let gateway = PaperGateway::new(PaperSettings::default());
        let store = MemoryStore::new();
        let governor = governor();
        let client = ClientId("c1".into());
        store
            .save_risk_state(&client, &RiskSnapshot {
                limits: RiskLimits {
                    max_daily_loss: dec!(-5000),
                    max_daily_profit: dec!(10000),
                },
                realized_pnl: dec!(-1200),
                kill_switch_engaged: true,
            })
            .await
            .unwrap();

        let reconciler = Reconciler::new(&gateway, &store, &governor);
        reconciler.resume_client(&client).await.unwrap();
        assert_eq!(governor.realized(&client).unwrap(), dec!(-1200));
        assert!(!governor.is_trading_allowed(&client));
    }
}
