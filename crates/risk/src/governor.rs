use crate::{Error, Result};
use core_types::{ClientId, RiskLimits};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Per-client risk state shared between the governor and in-flight permits.
///
/// The kill switch and epoch are atomics so an engage from one task is
/// immediately visible to every pair worker; the P&L accumulator sits behind
/// a mutex so a fill's delta and the limit check are one critical section.
#[derive(Debug)]
struct ClientRiskState {
    limits: RiskLimits,
    kill_switch: AtomicBool,
    /// Bumped on every kill-switch transition. A permit taken before the
    /// bump observes a different epoch and reports itself stale.
    epoch: AtomicU64,
    realized: Mutex<Decimal>,
}

/// The verdict of folding a realized P&L delta into the daily accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskVerdict {
    WithinLimits,
    /// A daily bound was crossed. The kill switch has already been engaged;
    /// the caller must flatten everything for this client.
    Breached { realized: Decimal },
}

/// Proof that trading was allowed for a client at a specific moment.
///
/// A pair worker takes a permit immediately before submitting an order and
/// re-checks it immediately after the gateway call returns; if the kill
/// switch was engaged while the order was in flight, the permit is stale and
/// the worker must cancel what it just submitted.
#[derive(Debug, Clone)]
pub struct TradePermit {
    client: ClientId,
    epoch: u64,
    state: Arc<ClientRiskState>,
}

impl TradePermit {
    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// True if the kill switch has flipped since this permit was taken.
    pub fn is_stale(&self) -> bool {
        self.state.kill_switch.load(Ordering::SeqCst)
            || self.state.epoch.load(Ordering::SeqCst) != self.epoch
    }
}

/// Enforces per-client daily P&L limits and the kill switch. Can override
/// every other component: a vetoed permit means no order, an engaged switch
/// means flatten.
#[derive(Debug, Default)]
pub struct RiskGovernor {
    clients: RwLock<HashMap<ClientId, Arc<ClientRiskState>>>,
}

impl RiskGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client with its daily limits. Called once at startup per
    /// roster entry; re-registering resets the client's day.
    pub fn register(&self, client: ClientId, limits: RiskLimits) {
        let state = Arc::new(ClientRiskState {
            limits,
            kill_switch: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            realized: Mutex::new(Decimal::ZERO),
        });
        self.clients
            .write()
            .expect("risk state lock poisoned")
            .insert(client, state);
    }

    fn state(&self, client: &ClientId) -> Result<Arc<ClientRiskState>> {
        self.clients
            .read()
            .expect("risk state lock poisoned")
            .get(client)
            .cloned()
            .ok_or_else(|| Error::UnknownClient(client.clone()))
    }

    pub fn is_trading_allowed(&self, client: &ClientId) -> bool {
        match self.state(client) {
            Ok(state) => !state.kill_switch.load(Ordering::SeqCst),
            Err(_) => false,
        }
    }

    /// Takes a trade permit, or vetoes if the kill switch is engaged.
    pub fn permit(&self, client: &ClientId) -> Result<TradePermit> {
        let state = self.state(client)?;
        let epoch = state.epoch.load(Ordering::SeqCst);
        if state.kill_switch.load(Ordering::SeqCst) {
            return Err(Error::Vetoed {
                client: client.clone(),
                reason: "kill switch engaged".to_string(),
            });
        }
        Ok(TradePermit {
            client: client.clone(),
            epoch,
            state,
        })
    }

    /// Sets the kill switch. Returns `true` when the flag actually changed.
    /// Engaging (or disengaging) bumps the epoch so in-flight permits go
    /// stale at once.
    pub fn set_kill_switch(&self, client: &ClientId, engaged: bool) -> Result<bool> {
        let state = self.state(client)?;
        let previous = state.kill_switch.swap(engaged, Ordering::SeqCst);
        if previous != engaged {
            state.epoch.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(client = %client, engaged, "Kill switch toggled.");
        }
        Ok(previous != engaged)
    }

    /// Folds a realized P&L delta into the day's accumulator and checks the
    /// limits. Crossing either bound engages the kill switch before this
    /// method returns, so no later decision for the client can trade.
    pub fn record_realized(&self, client: &ClientId, delta: Decimal) -> Result<RiskVerdict> {
        let state = self.state(client)?;
        let mut realized = state.realized.lock().expect("realized pnl lock poisoned");
        *realized += delta;
        let breached =
            *realized <= state.limits.max_daily_loss || *realized >= state.limits.max_daily_profit;
        if breached && !state.kill_switch.swap(true, Ordering::SeqCst) {
            state.epoch.fetch_add(1, Ordering::SeqCst);
            tracing::error!(
                client = %client,
                realized = %realized,
                "Daily P&L limit breached. Kill switch engaged."
            );
        }
        if breached {
            Ok(RiskVerdict::Breached {
                realized: *realized,
            })
        } else {
            Ok(RiskVerdict::WithinLimits)
        }
    }

    pub fn realized(&self, client: &ClientId) -> Result<Decimal> {
        let state = self.state(client)?;
        let realized = state.realized.lock().expect("realized pnl lock poisoned");
        Ok(*realized)
    }

    /// Re-arms a client for a new trading session: accumulator to zero,
    /// kill switch released.
    pub fn reset_day(&self, client: &ClientId) -> Result<()> {
        let state = self.state(client)?;
        {
            let mut realized = state.realized.lock().expect("realized pnl lock poisoned");
            *realized = Decimal::ZERO;
        }
        if state.kill_switch.swap(false, Ordering::SeqCst) {
            state.epoch.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Restores a persisted accumulator on restart.
    pub fn restore_realized(&self, client: &ClientId, value: Decimal) -> Result<()> {
        let state = self.state(client)?;
        let mut realized = state.realized.lock().expect("realized pnl lock poisoned");
        *realized = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn governor_with(client: &str) -> (RiskGovernor, ClientId) {
        let governor = RiskGovernor::new();
        let id = ClientId(client.to_string());
        governor.register(id.clone(), RiskLimits {
            max_daily_loss: dec!(-5000),
            max_daily_profit: dec!(10000),
        });
        (governor, id)
    }

    #[test]
    fn permit_goes_stale_when_kill_switch_engages() {
        let (governor, client) = governor_with("c1");
        let permit = governor.permit(&client).unwrap();
        assert!(!permit.is_stale());

        governor.set_kill_switch(&client, true).unwrap();
        assert!(permit.is_stale());
        assert!(governor.permit(&client).is_err());
        assert!(!governor.is_trading_allowed(&client));
    }

    #[test]
    fn loss_limit_breach_engages_kill_switch() {
        let (governor, client) = governor_with("c1");
        assert_eq!(
            governor.record_realized(&client, dec!(-3000)).unwrap(),
            RiskVerdict::WithinLimits
        );
        assert_eq!(
            governor.record_realized(&client, dec!(-2000)).unwrap(),
            RiskVerdict::Breached {
                realized: dec!(-5000),
            }
        );
        assert!(!governor.is_trading_allowed(&client));
    }

    #[test]
    fn profit_limit_breach_also_halts() {
        let (governor, client) = governor_with("c1");
        assert_eq!(
            governor.record_realized(&client, dec!(10500)).unwrap(),
            RiskVerdict::Breached {
                realized: dec!(10500),
            }
        );
        assert!(!governor.is_trading_allowed(&client));
    }

    #[test]
    fn engage_from_another_thread_is_visible() {
        let (governor, client) = governor_with("c1");
        let governor = std::sync::Arc::new(governor);
        let permit = governor.permit(&client).unwrap();

        let g = governor.clone();
        let c = client.clone();
        std::thread::spawn(move || {
            g.set_kill_switch(&c, true).unwrap();
        })
        .join()
        .unwrap();

        assert!(permit.is_stale());
        assert!(governor.permit(&client).is_err());
    }

    #[test]
    fn reset_day_rearms_the_client() {
        let (governor, client) = governor_with("c1");
        governor.record_realized(&client, dec!(-6000)).unwrap();
        assert!(!governor.is_trading_allowed(&client));

        governor.reset_day(&client).unwrap();
        assert!(governor.is_trading_allowed(&client));
        assert_eq!(governor.realized(&client).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn unknown_client_is_rejected() {
        let governor = RiskGovernor::new();
        let unknown = ClientId("ghost".to_string());
        assert!(matches!(
            governor.permit(&unknown),
            Err(Error::UnknownClient(_))
        ));
        assert!(!governor.is_trading_allowed(&unknown));
    }
}
