use chrono::NaiveTime;
use core_types::RiskLimits;
use execution::{GatewaySettings, PaperSettings};
use ladders::{TargetLadderSettings, TrailingLadderSettings};
use num_traits::FromPrimitive;
use rules::{DayRangeSettings, Sizing};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{Error, Result};

/// The application's global settings, loaded from the layered config files.
#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// The application's general settings.
    pub app: AppSettings,
    /// Trading-session wall-clock boundaries.
    pub session: SessionSettings,
    /// The day-range entry rule (the 8%/9% thresholds).
    #[serde(default)]
    pub entry: DayRangeSettings,
    /// The Y1..Y10 trailing-stop ladder.
    #[serde(default)]
    pub trailing: TrailingLadderSettings,
    /// The T1..T10 target ladder.
    #[serde(default)]
    pub targets: TargetLadderSettings,
    /// Gateway retry/timeout policy.
    #[serde(default)]
    pub gateway: GatewaySettings,
    /// Paper venue settings.
    #[serde(default)]
    pub paper: PaperSettings,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    /// The environment the application is running in (e.g., "development", "production").
    pub environment: String,
    /// The log level for the application.
    pub log_level: String,
}

/// Wall-clock boundaries of the trading session, in exchange-local time.
///
/// The exchange timezone is a fixed UTC offset (the default +05:30 matches
/// the NSE session the rule-set was written for).
#[derive(Deserialize, Debug, Clone)]
pub struct SessionSettings {
    #[serde(default = "default_square_off_time")]
    pub square_off_time: NaiveTime,
    #[serde(default = "default_no_new_entry_after")]
    pub no_new_entry_after: NaiveTime,
    #[serde(default = "default_utc_offset_minutes")]
    pub exchange_utc_offset_minutes: i32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            square_off_time: default_square_off_time(),
            no_new_entry_after: default_no_new_entry_after(),
            exchange_utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

fn default_square_off_time() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 15, 0).expect("valid literal time")
}

fn default_no_new_entry_after() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 0, 0).expect("valid literal time")
}

fn default_utc_offset_minutes() -> i32 {
    330
}

// --- Structs for the clients.toml roster ---

/// The per-session client roster and instrument universe.
#[derive(Deserialize, Debug, Clone)]
pub struct ClientsConfig {
    #[serde(rename = "instruments")]
    pub instruments: Vec<InstrumentConfig>,

    #[serde(rename = "clients")]
    pub clients: Vec<ClientConfig>,
}

/// One tradable instrument and its day-open anchor.
#[derive(Deserialize, Debug, Clone)]
pub struct InstrumentConfig {
    pub symbol: String,
    pub day_open: f64,
}

/// Configuration for a single brokerage client account.
#[derive(Deserialize, Debug, Clone)]
pub struct ClientConfig {
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// How entry quantity is derived for this client.
    pub sizing: Sizing,
    /// Negative bound; trading halts for the day once realized P&L reaches it.
    pub max_daily_loss: f64,
    /// Positive bound; trading halts for the day once realized P&L reaches it.
    pub max_daily_profit: f64,
    /// Symbols this client watches; must name entries of `instruments`.
    pub watchlist: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl ClientConfig {
    /// Builds the client's risk limits, validating signs.
    pub fn risk_limits(&self) -> Result<RiskLimits> {
        let max_daily_loss = Decimal::from_f64(self.max_daily_loss)
            .ok_or_else(|| Error::Invalid(format!("{}: max_daily_loss is not a number", self.id)))?;
        let max_daily_profit = Decimal::from_f64(self.max_daily_profit).ok_or_else(|| {
            Error::Invalid(format!("{}: max_daily_profit is not a number", self.id))
        })?;
        if max_daily_loss >= Decimal::ZERO {
            return Err(Error::Invalid(format!(
                "{}: max_daily_loss must be negative",
                self.id
            )));
        }
        if max_daily_profit <= Decimal::ZERO {
            return Err(Error::Invalid(format!(
                "{}: max_daily_profit must be positive",
                self.id
            )));
        }
        Ok(RiskLimits {
            max_daily_loss,
            max_daily_profit,
        })
    }
}
