use crate::{PositionSnapshot, Result, RiskSnapshot, StateStore};
use async_trait::async_trait;
use core_types::{ClientId, InstrumentId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An in-memory state store.
///
/// Used by the paper session and the tests; it honors the same
/// write-before-next-tick contract as a durable backend, just without
/// surviving a process restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    positions: Arc<RwLock<HashMap<(ClientId, InstrumentId), PositionSnapshot>>>,
    risk: Arc<RwLock<HashMap<ClientId, RiskSnapshot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored position snapshots, across all clients.
    pub async fn position_count(&self) -> usize {
        self.positions.read().await.len()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load_positions(&self, client: &ClientId) -> Result<Vec<PositionSnapshot>> {
        let positions = self.positions.read().await;
        Ok(positions
            .iter()
            .filter(|((c, _), _)| c == client)
            .map(|(_, snapshot)| snapshot.clone())
            .collect())
    }

    async fn save_position_state(&self, snapshot: &PositionSnapshot) -> Result<()> {
        let key = (
            snapshot.position.client.clone(),
            snapshot.position.instrument.clone(),
        );
        self.positions.write().await.insert(key, snapshot.clone());
        Ok(())
    }

    async fn load_risk_state(&self, client: &ClientId) -> Result<Option<RiskSnapshot>> {
        Ok(self.risk.read().await.get(client).cloned())
    }

    async fn save_risk_state(&self, client: &ClientId, snapshot: &RiskSnapshot) -> Result<()> {
        self.risk
            .write()
            .await
            .insert(client.clone(), snapshot.clone());
        Ok(())
    }

    async fn clear_position(&self, client: &ClientId, instrument: &InstrumentId) -> Result<()> {
        self.positions
            .write()
            .await
            .remove(&(client.clone(), instrument.clone()));
        Ok(())
    }
}
