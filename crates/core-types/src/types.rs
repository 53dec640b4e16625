use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a tradable instrument (e.g., "NSE:RELIANCE").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentId(pub String);

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a brokerage client account managed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single market data event from the tick feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: InstrumentId,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// The intraday view of an instrument. The identifier is immutable;
/// the price fields are updated only by tick ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub day_open: Decimal,
    pub day_high: Decimal,
    pub day_low: Decimal,
    pub last_price: Decimal,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl Instrument {
    pub fn new(id: InstrumentId, day_open: Decimal) -> Self {
        Self {
            id,
            day_open,
            day_high: day_open,
            day_low: day_open,
            last_price: day_open,
            last_tick_at: None,
        }
    }

    /// Folds a tick into the day range. High/low only ever widen.
    pub fn apply_tick(&mut self, tick: &Tick) {
        self.last_price = tick.price;
        self.last_tick_at = Some(tick.timestamp);
        if tick.price > self.day_high {
            self.day_high = tick.price;
        }
        if tick.price < self.day_low {
            self.day_low = tick.price;
        }
    }
}

/// The direction of a position or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The side of an order that closes a position on this side.
    pub fn closing(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

/// Lifecycle states of a position. `Flat` is initial, `Closed` is terminal
/// for the trading day; `Stuck` means retries were exhausted and an operator
/// has to intervene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Flat,
    Pending,
    Open,
    Exiting,
    Closed,
    Stuck,
}

/// A position owned exclusively by one (client, instrument) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub client: ClientId,
    pub instrument: InstrumentId,
    pub side: Side,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub status: PositionStatus,
    pub opened_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Mark-to-market P&L of the remaining quantity at `price`.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        let per_unit = match self.side {
            Side::Long => price - self.entry_price,
            Side::Short => self.entry_price - price,
        };
        per_unit * self.quantity
    }
}

/// A client-assigned identifier that makes a retried order submission
/// recognizable as the same intended action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyToken(pub String);

impl IdempotencyToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An order request handed to the execution gateway. `price: None` means a
/// market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub instrument: InstrumentId,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub token: IdempotencyToken,
}

/// Venue-reported status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    Acknowledged,
    Filled,
    PartiallyFilled,
    Rejected,
    Failed,
}

/// The gateway's answer to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub fill_price: Option<Decimal>,
}

/// Per-client daily P&L bounds. `max_daily_loss` is a negative number;
/// crossing either bound is terminal for the trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_daily_loss: Decimal,
    pub max_daily_profit: Decimal,
}

/// The outcome of evaluating the entry rule on a tick. `strength` reports
/// the index of the highest crossed threshold (0-based).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntrySignal {
    NoSignal,
    EnterLong {
        price: Decimal,
        quantity: Decimal,
        strength: u8,
    },
    EnterShort {
        price: Decimal,
        quantity: Decimal,
        strength: u8,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn apply_tick_widens_day_range() {
        let mut inst = Instrument::new(InstrumentId("NSE:ACME".into()), dec!(100));
        let id = inst.id.clone();
        let tick = |p| Tick {
            instrument: id.clone(),
            price: p,
            timestamp: Utc::now(),
        };
        inst.apply_tick(&tick(dec!(104)));
        inst.apply_tick(&tick(dec!(97)));
        inst.apply_tick(&tick(dec!(101)));
        assert_eq!(inst.day_high, dec!(104));
        assert_eq!(inst.day_low, dec!(97));
        assert_eq!(inst.last_price, dec!(101));
    }

    #[test]
    fn unrealized_pnl_respects_side() {
        let pos = Position {
            client: ClientId("c1".into()),
            instrument: InstrumentId("NSE:ACME".into()),
            side: Side::Short,
            entry_price: dec!(100),
            quantity: dec!(10),
            status: PositionStatus::Open,
            opened_at: None,
        };
        assert_eq!(pos.unrealized_pnl(dec!(95)), dec!(50));
        assert_eq!(pos.unrealized_pnl(dec!(103)), dec!(-30));
    }
}
