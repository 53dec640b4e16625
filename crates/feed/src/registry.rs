use crate::{Error, InstrumentRegistry, Result};
use async_trait::async_trait;
use core_types::{ClientId, InstrumentId};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

/// A registry backed by the loaded roster configuration.
///
/// Watchlists and day-open anchors are fixed for the session; a live
/// deployment would put the broker's instrument master behind the same
/// trait.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    watchlists: HashMap<ClientId, HashSet<InstrumentId>>,
    day_opens: HashMap<InstrumentId, Decimal>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instrument(&mut self, instrument: InstrumentId, day_open: Decimal) {
        self.day_opens.insert(instrument, day_open);
    }

    pub fn watch(&mut self, client: ClientId, instrument: InstrumentId) {
        self.watchlists.entry(client).or_default().insert(instrument);
    }
}

#[async_trait]
impl InstrumentRegistry for StaticRegistry {
    async fn active_instruments(&self, client: &ClientId) -> Result<HashSet<InstrumentId>> {
        Ok(self.watchlists.get(client).cloned().unwrap_or_default())
    }

    async fn day_open(&self, instrument: &InstrumentId) -> Result<Decimal> {
        self.day_opens
            .get(instrument)
            .copied()
            .ok_or_else(|| Error::UnknownInstrument(instrument.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn watchlists_are_per_client() {
        let mut registry = StaticRegistry::new();
        let acme = InstrumentId("NSE:ACME".into());
        let zeta = InstrumentId("NSE:ZETA".into());
        registry.add_instrument(acme.clone(), dec!(100));
        registry.add_instrument(zeta.clone(), dec!(50));
        registry.watch(ClientId("c1".into()), acme.clone());
        registry.watch(ClientId("c1".into()), zeta.clone());
        registry.watch(ClientId("c2".into()), acme.clone());

        let c1 = registry
            .active_instruments(&ClientId("c1".into()))
            .await
            .unwrap();
        assert_eq!(c1.len(), 2);
        let c2 = registry
            .active_instruments(&ClientId("c2".into()))
            .await
            .unwrap();
        assert_eq!(c2, HashSet::from([acme.clone()]));

        assert_eq!(registry.day_open(&acme).await.unwrap(), dec!(100));
        assert!(registry.day_open(&InstrumentId("NSE:GHOST".into())).await.is_err());
    }
}
