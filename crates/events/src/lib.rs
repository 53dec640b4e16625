// Typed events the engine emits for external observers (dashboards,
// alerting, audit). Delivery is fire-and-forget over a broadcast channel;
// the core never blocks on it.

use chrono::{DateTime, Utc};
use core_types::{ClientId, IdempotencyToken, InstrumentId, Side};
use rust_decimal::Decimal;
use serde::Serialize;

/// A log message event mirrored from the tracing pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct LogMessage {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// The top-level engine event enum.
/// `tag` and `content` are used by serde for clean JSON representation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    Log(LogMessage),
    KillSwitchEngaged {
        client: ClientId,
        reason: String,
    },
    RiskBreach {
        client: ClientId,
        realized_pnl: Decimal,
    },
    OrderStuck {
        client: ClientId,
        instrument: InstrumentId,
        token: IdempotencyToken,
        attempts: u32,
    },
    PositionOpened {
        client: ClientId,
        instrument: InstrumentId,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    },
    PartialExit {
        client: ClientId,
        instrument: InstrumentId,
        level: usize,
        price: Decimal,
        quantity: Decimal,
    },
    PositionClosed {
        client: ClientId,
        instrument: InstrumentId,
        price: Decimal,
        realized_pnl: Decimal,
        reason: String,
    },
    StopAdvanced {
        client: ClientId,
        instrument: InstrumentId,
        level: usize,
        stop_price: Decimal,
    },
    SquareOffTriggered {
        at: DateTime<Utc>,
    },
}
