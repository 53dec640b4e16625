use rust_decimal::Decimal;
use serde::Deserialize;

/// Settings for the day-range entry rule.
///
/// `thresholds_pct` is an ordered escalation list: the entry fires once the
/// move from day-open crosses the lowest threshold, and the highest crossed
/// threshold is reported as the signal's strength. The default pair is the
/// 8%/9% rule.
#[derive(Deserialize, Debug, Clone)]
pub struct DayRangeSettings {
    #[serde(default = "default_thresholds")]
    pub thresholds_pct: Vec<f64>,

    /// Ticks older than this are treated as stale and produce no signal.
    #[serde(default = "default_max_tick_age")]
    pub max_tick_age_secs: i64,
}

impl Default for DayRangeSettings {
    fn default() -> Self {
        Self {
            thresholds_pct: default_thresholds(),
            max_tick_age_secs: default_max_tick_age(),
        }
    }
}

fn default_thresholds() -> Vec<f64> {
    vec![8.0, 9.0]
}

fn default_max_tick_age() -> i64 {
    30
}

/// How the entry quantity for a client is derived.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum Sizing {
    /// A fixed number of units per entry.
    Quantity(Decimal),
    /// A capital allocation; quantity is floor(capital / price), minimum 1.
    Capital(Decimal),
}
