use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{ClientId, InstrumentId, Position, RiskLimits};
use ladders::{TargetLadderState, TrailingStopState};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod memory;

// Re-export public types
pub use error::{Error, Result};
pub use memory::MemoryStore;

/// A durable snapshot of everything a pair worker needs to resume a
/// position after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub position: Position,
    pub trailing: Option<TrailingStopState>,
    pub targets: TargetLadderState,
    pub updated_at: DateTime<Utc>,
}

/// The durable per-client risk state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub limits: RiskLimits,
    pub realized_pnl: Decimal,
    pub kill_switch_engaged: bool,
}

/// The persistence seam for position and risk state.
///
/// `save_position_state` is called on every state-machine transition, before
/// the next tick for that pair is processed, so a crash mid-transition
/// resumes deterministically from the last durable state. Durable backends
/// are external collaborators behind this trait.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_positions(&self, client: &ClientId) -> Result<Vec<PositionSnapshot>>;

    async fn save_position_state(&self, snapshot: &PositionSnapshot) -> Result<()>;

    async fn load_risk_state(&self, client: &ClientId) -> Result<Option<RiskSnapshot>>;

    async fn save_risk_state(&self, client: &ClientId, snapshot: &RiskSnapshot) -> Result<()>;

    /// Removes the snapshot for a pair once its position is terminal.
    async fn clear_position(&self, client: &ClientId, instrument: &InstrumentId) -> Result<()>;
}
