use serde::Deserialize;

/// Retry/timeout policy for gateway submissions.
#[derive(Deserialize, Debug, Clone)]
pub struct GatewaySettings {
    /// How long to wait for a single acknowledgment.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Total submission attempts before the position is marked stuck.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff between attempts; grows linearly with the attempt count.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_ack_timeout_ms() -> u64 {
    2_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    250
}

/// Settings for the paper venue.
#[derive(Deserialize, Debug, Clone)]
pub struct PaperSettings {
    /// Slippage applied against the order side, as a percentage.
    #[serde(default)]
    pub slippage_pct: f64,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self { slippage_pct: 0.0 }
    }
}
