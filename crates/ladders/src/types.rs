use serde::Deserialize;

/// One rung of the trailing-stop ladder: once the favorable move from entry
/// crosses `threshold_pct`, the stop offset tightens to `offset_pct` behind
/// the high-water mark.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TrailingLevelSettings {
    pub threshold_pct: f64,
    pub offset_pct: f64,
}

/// Configuration of the Y1..Y10 trailing-stop ladder.
///
/// `initial_stop_pct` is the level-0 offset applied at entry. Thresholds must
/// be strictly increasing and offsets strictly decreasing (the stop only ever
/// tightens); both are validated when the ladder is built.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TrailingLadderSettings {
    pub initial_stop_pct: f64,
    pub levels: Vec<TrailingLevelSettings>,
}

impl Default for TrailingLadderSettings {
    fn default() -> Self {
        // Y1..Y10: every 1% of favorable move tightens the stop by 0.4%.
        let levels = (0..10)
            .map(|i| TrailingLevelSettings {
                threshold_pct: (i + 1) as f64,
                offset_pct: 4.5 - 0.4 * i as f64,
            })
            .collect();
        Self {
            initial_stop_pct: 5.0,
            levels,
        }
    }
}

/// One rung of the target ladder: at a favorable move of `move_pct` from
/// entry, book `fraction` of the remaining quantity.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TargetLevelSettings {
    pub move_pct: f64,
    pub fraction: f64,
}

/// Configuration of the T1..T10 partial-booking ladder. Moves must be
/// strictly increasing and fractions within (0, 1].
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TargetLadderSettings {
    pub levels: Vec<TargetLevelSettings>,
}

impl Default for TargetLadderSettings {
    fn default() -> Self {
        // T1..T9 book 10% of what remains; T10 clears the position.
        let levels = (0..10)
            .map(|i| TargetLevelSettings {
                move_pct: (i + 1) as f64,
                fraction: if i == 9 { 1.0 } else { 0.1 },
            })
            .collect();
        Self { levels }
    }
}
