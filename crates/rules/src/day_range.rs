use crate::types::{DayRangeSettings, Sizing};
use crate::{EntryRule, Error, Result};
use chrono::{DateTime, Duration, Utc};
use core_types::{EntrySignal, Instrument};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;

/// The "8%/9%" day-range entry rule.
///
/// Fires a directional entry when the last traded price has moved at least
/// the lowest configured threshold away from day-open. A rise produces
/// `EnterLong`, a fall produces `EnterShort`. Thresholds are validated at
/// construction to be positive and strictly increasing.
#[derive(Debug)]
pub struct DayRangeRule {
    thresholds: Vec<Decimal>,
    max_tick_age: Duration,
}

impl DayRangeRule {
    pub fn new(settings: &DayRangeSettings) -> Result<Self> {
        if settings.thresholds_pct.is_empty() {
            return Err(Error::InvalidParameters(
                "at least one entry threshold is required".to_string(),
            ));
        }

        let mut thresholds = Vec::with_capacity(settings.thresholds_pct.len());
        for (i, pct) in settings.thresholds_pct.iter().enumerate() {
            let t = Decimal::from_f64(*pct).ok_or_else(|| {
                Error::InvalidParameters(format!("threshold {} is not a valid number", pct))
            })?;
            if t <= Decimal::ZERO {
                return Err(Error::InvalidParameters(format!(
                    "threshold {} must be positive",
                    pct
                )));
            }
            if let Some(prev) = thresholds.last() {
                if t <= *prev {
                    return Err(Error::InvalidParameters(format!(
                        "thresholds must be strictly increasing (index {})",
                        i
                    )));
                }
            }
            thresholds.push(t);
        }

        if settings.max_tick_age_secs <= 0 {
            return Err(Error::InvalidParameters(
                "max_tick_age_secs must be positive".to_string(),
            ));
        }

        Ok(Self {
            thresholds,
            max_tick_age: Duration::seconds(settings.max_tick_age_secs),
        })
    }

    /// Index of the highest threshold `move_pct` has crossed, if any.
    fn strength(&self, move_pct: Decimal) -> Option<u8> {
        let mut strength = None;
        for (i, t) in self.thresholds.iter().enumerate() {
            if move_pct >= *t {
                strength = Some(i as u8);
            }
        }
        strength
    }

    fn quantity(sizing: &Sizing, price: Decimal) -> Decimal {
        match sizing {
            Sizing::Quantity(q) => *q,
            Sizing::Capital(capital) => {
                let qty = (capital / price).trunc();
                if qty < Decimal::ONE { Decimal::ONE } else { qty }
            }
        }
    }
}

impl EntryRule for DayRangeRule {
    fn name(&self) -> &'static str {
        "DayRangeRule"
    }

    fn evaluate(
        &self,
        instrument: &Instrument,
        now: DateTime<Utc>,
        sizing: &Sizing,
    ) -> EntrySignal {
        // A zero or unknown day-open cannot anchor a percentage move.
        if instrument.day_open <= Decimal::ZERO {
            return EntrySignal::NoSignal;
        }

        // Stale data produces no signal rather than a spurious one.
        match instrument.last_tick_at {
            Some(at) if now - at <= self.max_tick_age => {}
            _ => return EntrySignal::NoSignal,
        }

        let price = instrument.last_price;
        if price <= Decimal::ZERO {
            return EntrySignal::NoSignal;
        }

        let move_pct = (price - instrument.day_open) / instrument.day_open * Decimal::ONE_HUNDRED;

        if let Some(strength) = self.strength(move_pct) {
            return EntrySignal::EnterLong {
                price,
                quantity: Self::quantity(sizing, price),
                strength,
            };
        }
        if let Some(strength) = self.strength(-move_pct) {
            return EntrySignal::EnterShort {
                price,
                quantity: Self::quantity(sizing, price),
                strength,
            };
        }
        EntrySignal::NoSignal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{InstrumentId, Tick};
    use rust_decimal_macros::dec;

    fn rule() -> DayRangeRule {
        DayRangeRule::new(&DayRangeSettings::default()).unwrap()
    }

    fn instrument_at(price: Decimal, now: DateTime<Utc>) -> Instrument {
        let mut inst = Instrument::new(InstrumentId("NSE:ACME".into()), dec!(100));
        inst.apply_tick(&Tick {
            instrument: inst.id.clone(),
            price,
            timestamp: now,
        });
        inst
    }

    #[test]
    fn fires_long_at_eight_percent() {
        let now = Utc::now();
        let inst = instrument_at(dec!(108), now);
        let signal = rule().evaluate(&inst, now, &Sizing::Quantity(dec!(5)));
        assert_eq!(
            signal,
            EntrySignal::EnterLong {
                price: dec!(108),
                quantity: dec!(5),
                strength: 0,
            }
        );
    }

    #[test]
    fn nine_percent_reports_higher_strength() {
        let now = Utc::now();
        let inst = instrument_at(dec!(109.5), now);
        match rule().evaluate(&inst, now, &Sizing::Quantity(dec!(1))) {
            EntrySignal::EnterLong { strength, .. } => assert_eq!(strength, 1),
            other => panic!("expected EnterLong, got {:?}", other),
        }
    }

    #[test]
    fn fires_short_on_fall() {
        let now = Utc::now();
        let inst = instrument_at(dec!(91.5), now);
        match rule().evaluate(&inst, now, &Sizing::Quantity(dec!(1))) {
            EntrySignal::EnterShort { strength, .. } => assert_eq!(strength, 0),
            other => panic!("expected EnterShort, got {:?}", other),
        }
    }

    #[test]
    fn below_threshold_is_no_signal() {
        let now = Utc::now();
        let inst = instrument_at(dec!(107.9), now);
        assert_eq!(
            rule().evaluate(&inst, now, &Sizing::Quantity(dec!(1))),
            EntrySignal::NoSignal
        );
    }

    #[test]
    fn zero_day_open_is_no_signal() {
        let now = Utc::now();
        let mut inst = Instrument::new(InstrumentId("NSE:ACME".into()), dec!(0));
        inst.apply_tick(&Tick {
            instrument: inst.id.clone(),
            price: dec!(10),
            timestamp: now,
        });
        assert_eq!(
            rule().evaluate(&inst, now, &Sizing::Quantity(dec!(1))),
            EntrySignal::NoSignal
        );
    }

    #[test]
    fn stale_tick_is_no_signal() {
        let now = Utc::now();
        let inst = instrument_at(dec!(110), now - Duration::seconds(120));
        assert_eq!(
            rule().evaluate(&inst, now, &Sizing::Quantity(dec!(1))),
            EntrySignal::NoSignal
        );
    }

    #[test]
    fn repeated_evaluation_is_idempotent() {
        let now = Utc::now();
        let inst = instrument_at(dec!(108), now);
        let r = rule();
        let first = r.evaluate(&inst, now, &Sizing::Capital(dec!(10000)));
        let second = r.evaluate(&inst, now, &Sizing::Capital(dec!(10000)));
        assert_eq!(first, second);
    }

    #[test]
    fn capital_sizing_floors_and_bottoms_at_one() {
        let now = Utc::now();
        let inst = instrument_at(dec!(108), now);
        match rule().evaluate(&inst, now, &Sizing::Capital(dec!(1000))) {
            EntrySignal::EnterLong { quantity, .. } => assert_eq!(quantity, dec!(9)),
            other => panic!("expected EnterLong, got {:?}", other),
        }
        // Capital smaller than the price still buys a single unit.
        match rule().evaluate(&inst, now, &Sizing::Capital(dec!(50))) {
            EntrySignal::EnterLong { quantity, .. } => assert_eq!(quantity, dec!(1)),
            other => panic!("expected EnterLong, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unordered_thresholds() {
        let settings = DayRangeSettings {
            thresholds_pct: vec![9.0, 8.0],
            max_tick_age_secs: 30,
        };
        assert!(DayRangeRule::new(&settings).is_err());
    }
}
