use crate::types::TrailingLadderSettings;
use crate::{Error, Result};
use core_types::Side;
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A validated trailing-stop ladder (Y1..Y10).
///
/// The ladder is immutable configuration shared by every position it guards;
/// the mutable part lives in [`TrailingStopState`] so it can be persisted
/// with the position.
#[derive(Debug, Clone)]
pub struct TrailingLadder {
    initial_offset: Decimal,
    levels: Vec<LadderLevel>,
}

#[derive(Debug, Clone)]
struct LadderLevel {
    threshold_pct: Decimal,
    offset_pct: Decimal,
}

/// The per-position trailing-stop state. Invariant: `stop_price` only ever
/// moves in the direction that protects more profit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStopState {
    pub side: Side,
    pub entry_price: Decimal,
    /// Most favorable price seen since entry (high-water mark; for a short
    /// position this is the lowest price).
    pub high_water: Decimal,
    pub stop_price: Decimal,
    /// Active ladder level, 0 = the initial stop, 1..=N once thresholds are
    /// crossed. Advances monotonically.
    pub level: usize,
}

/// Outcome of folding one tick into the trailing stop.
#[derive(Debug, Clone, PartialEq)]
pub enum TrailingUpdate {
    Hold,
    /// The active level advanced and the stop tightened.
    Advanced { level: usize, stop_price: Decimal },
    /// Price crossed the stop: the position must exit. Takes precedence over
    /// a ladder advance on the same tick.
    StopHit { stop_price: Decimal },
}

impl TrailingLadder {
    pub fn from_settings(settings: &TrailingLadderSettings) -> Result<Self> {
        let initial_offset = decimal_pct(settings.initial_stop_pct, "initial_stop_pct")?;
        if initial_offset <= Decimal::ZERO {
            return Err(Error::InvalidLadder(
                "initial_stop_pct must be positive".to_string(),
            ));
        }

        let mut levels = Vec::with_capacity(settings.levels.len());
        let mut last_offset = initial_offset;
        let mut last_threshold = Decimal::ZERO;
        for (i, l) in settings.levels.iter().enumerate() {
            let threshold_pct = decimal_pct(l.threshold_pct, "threshold_pct")?;
            let offset_pct = decimal_pct(l.offset_pct, "offset_pct")?;
            if threshold_pct <= last_threshold {
                return Err(Error::InvalidLadder(format!(
                    "thresholds must be strictly increasing (level {})",
                    i + 1
                )));
            }
            if offset_pct <= Decimal::ZERO || offset_pct >= last_offset {
                return Err(Error::InvalidLadder(format!(
                    "offsets must be positive and strictly tightening (level {})",
                    i + 1
                )));
            }
            last_threshold = threshold_pct;
            last_offset = offset_pct;
            levels.push(LadderLevel {
                threshold_pct,
                offset_pct,
            });
        }

        Ok(Self {
            initial_offset,
            levels,
        })
    }

    /// Creates the initial stop state for a freshly opened position.
    pub fn open(&self, side: Side, entry_price: Decimal) -> TrailingStopState {
        TrailingStopState {
            side,
            entry_price,
            high_water: entry_price,
            stop_price: self.stop_from(side, entry_price, self.initial_offset),
            level: 0,
        }
    }

    /// Folds one tick into the stop state.
    ///
    /// Order of operations: improve the high-water mark, advance the level,
    /// tighten the stop, then check for a breach — so a tick that both
    /// advances the ladder and crosses the stop reports the breach.
    pub fn on_tick(&self, state: &mut TrailingStopState, price: Decimal) -> TrailingUpdate {
        let improved = match state.side {
            Side::Long => price > state.high_water,
            Side::Short => price < state.high_water,
        };
        if improved {
            state.high_water = price;
        }

        let favorable_pct = self.favorable_pct(state);
        let mut advanced = false;
        let mut level = state.level;
        for (i, l) in self.levels.iter().enumerate() {
            if favorable_pct >= l.threshold_pct {
                level = level.max(i + 1);
            }
        }
        if level > state.level {
            state.level = level;
            advanced = true;
        }

        let offset = if state.level == 0 {
            self.initial_offset
        } else {
            self.levels[state.level - 1].offset_pct
        };
        let candidate = self.stop_from(state.side, state.high_water, offset);
        // The monotonic clamp: never loosen protection already granted.
        let tightened = match state.side {
            Side::Long => candidate > state.stop_price,
            Side::Short => candidate < state.stop_price,
        };
        if tightened {
            state.stop_price = candidate;
        }

        let breached = match state.side {
            Side::Long => price <= state.stop_price,
            Side::Short => price >= state.stop_price,
        };
        if breached {
            return TrailingUpdate::StopHit {
                stop_price: state.stop_price,
            };
        }
        if advanced {
            return TrailingUpdate::Advanced {
                level: state.level,
                stop_price: state.stop_price,
            };
        }
        TrailingUpdate::Hold
    }

    fn favorable_pct(&self, state: &TrailingStopState) -> Decimal {
        if state.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let diff = match state.side {
            Side::Long => state.high_water - state.entry_price,
            Side::Short => state.entry_price - state.high_water,
        };
        diff / state.entry_price * Decimal::ONE_HUNDRED
    }

    fn stop_from(&self, side: Side, anchor: Decimal, offset_pct: Decimal) -> Decimal {
        let factor = offset_pct / Decimal::ONE_HUNDRED;
        match side {
            Side::Long => anchor * (Decimal::ONE - factor),
            Side::Short => anchor * (Decimal::ONE + factor),
        }
    }
}

fn decimal_pct(value: f64, field: &str) -> Result<Decimal> {
    Decimal::from_f64(value)
        .ok_or_else(|| Error::InvalidLadder(format!("{} is not a valid number", field)))
}
