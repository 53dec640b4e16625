use crate::types::TargetLadderSettings;
use crate::{Error, Result};
use core_types::Side;
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A validated target ladder (T1..T10). Immutable configuration; the ladder
/// pointer lives in [`TargetLadderState`] alongside the position.
#[derive(Debug, Clone)]
pub struct TargetLadder {
    levels: Vec<TargetLevel>,
}

#[derive(Debug, Clone)]
struct TargetLevel {
    move_pct: Decimal,
    fraction: Decimal,
}

/// The per-position ladder pointer. Invariant: levels fire in strictly
/// increasing index order and each fires at most once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetLadderState {
    pub next_level: usize,
}

/// One fired target level: book `quantity` at the current price.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetFire {
    pub level: usize,
    pub quantity: Decimal,
}

impl TargetLadder {
    pub fn from_settings(settings: &TargetLadderSettings) -> Result<Self> {
        if settings.levels.is_empty() {
            return Err(Error::InvalidLadder(
                "target ladder needs at least one level".to_string(),
            ));
        }
        let mut levels = Vec::with_capacity(settings.levels.len());
        let mut last_move = Decimal::ZERO;
        for (i, l) in settings.levels.iter().enumerate() {
            let move_pct = Decimal::from_f64(l.move_pct).ok_or_else(|| {
                Error::InvalidLadder(format!("move_pct is not a valid number (level {})", i + 1))
            })?;
            let fraction = Decimal::from_f64(l.fraction).ok_or_else(|| {
                Error::InvalidLadder(format!("fraction is not a valid number (level {})", i + 1))
            })?;
            if move_pct <= last_move {
                return Err(Error::InvalidLadder(format!(
                    "target moves must be strictly increasing (level {})",
                    i + 1
                )));
            }
            if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
                return Err(Error::InvalidLadder(format!(
                    "fraction must be within (0, 1] (level {})",
                    i + 1
                )));
            }
            last_move = move_pct;
            levels.push(TargetLevel { move_pct, fraction });
        }
        Ok(Self { levels })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// The price at which `level` (0-based) fires for a position entered at
    /// `entry_price`.
    pub fn level_price(&self, level: usize, side: Side, entry_price: Decimal) -> Decimal {
        let factor = self.levels[level].move_pct / Decimal::ONE_HUNDRED;
        match side {
            Side::Long => entry_price * (Decimal::ONE + factor),
            Side::Short => entry_price * (Decimal::ONE - factor),
        }
    }

    /// Fires every level the tick has reached, strictly in index order.
    ///
    /// A tick that gaps past several levels fires all of them in one call,
    /// each exactly once. Booked quantity per level is
    /// floor(remaining x fraction), clamped to [1, remaining].
    pub fn on_tick(
        &self,
        state: &mut TargetLadderState,
        side: Side,
        entry_price: Decimal,
        remaining: Decimal,
        price: Decimal,
    ) -> Vec<TargetFire> {
        let mut fires = Vec::new();
        let mut left = remaining;
        while state.next_level < self.levels.len() && left > Decimal::ZERO {
            let level_price = self.level_price(state.next_level, side, entry_price);
            let reached = match side {
                Side::Long => price >= level_price,
                Side::Short => price <= level_price,
            };
            if !reached {
                break;
            }
            let mut qty = (left * self.levels[state.next_level].fraction).trunc();
            if qty < Decimal::ONE {
                qty = Decimal::ONE;
            }
            if qty > left {
                qty = left;
            }
            fires.push(TargetFire {
                level: state.next_level,
                quantity: qty,
            });
            left -= qty;
            state.next_level += 1;
        }
        fires
    }

    /// True once every level has fired.
    pub fn exhausted(&self, state: &TargetLadderState) -> bool {
        state.next_level >= self.levels.len()
    }
}
