use config::{Config, Environment, File};
use ladders::{TargetLadder, TrailingLadder};
use rules::day_range::DayRangeRule;
use std::collections::HashSet;

pub mod error;
pub mod types;

// Re-export the most important types for easy access.
pub use error::{Error, Result};
pub use types::{
    AppSettings, ClientConfig, ClientsConfig, InstrumentConfig, SessionSettings, Settings,
};

/// Loads the application settings from various sources.
///
/// This function orchestrates the layered configuration loading:
/// 1. Reads from a default `base.toml` file.
/// 2. Merges settings from an environment-specific file (e.g., `development.toml`).
/// 3. Merges settings from environment variables (prefix `APP`, separator `__`).
pub fn load_settings() -> Result<Settings> {
    let environment = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "development".into());

    let settings = Config::builder()
        .add_source(File::with_name("config/base"))
        .add_source(File::with_name(&format!("config/{}", environment)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let settings: Settings = settings.try_deserialize()?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Loads the client roster from `config/clients.toml`.
pub fn load_clients_config() -> Result<ClientsConfig> {
    let content = std::fs::read_to_string("config/clients.toml")?;
    let roster: ClientsConfig = toml::from_str(&content)?;
    validate_roster(&roster)?;
    Ok(roster)
}

/// Validates the derived rule and ladder configuration by constructing each
/// of them; unordered thresholds or non-tightening offsets are rejected here,
/// at load time, not at the first tick.
pub fn validate_settings(settings: &Settings) -> Result<()> {
    DayRangeRule::new(&settings.entry)?;
    TrailingLadder::from_settings(&settings.trailing)?;
    TargetLadder::from_settings(&settings.targets)?;
    if settings.session.no_new_entry_after > settings.session.square_off_time {
        return Err(Error::Invalid(
            "no_new_entry_after must not be later than square_off_time".to_string(),
        ));
    }
    if settings.session.exchange_utc_offset_minutes.abs() >= 24 * 60 {
        return Err(Error::Invalid(
            "exchange_utc_offset_minutes must be within a day".to_string(),
        ));
    }
    Ok(())
}

/// Cross-checks the roster: unique client ids, valid risk bounds, and
/// watchlists that only name known instruments.
pub fn validate_roster(roster: &ClientsConfig) -> Result<()> {
    let symbols: HashSet<&str> = roster
        .instruments
        .iter()
        .map(|i| i.symbol.as_str())
        .collect();
    if symbols.len() != roster.instruments.len() {
        return Err(Error::Invalid("duplicate instrument symbols".to_string()));
    }

    let mut ids = HashSet::new();
    for client in &roster.clients {
        if !ids.insert(client.id.as_str()) {
            return Err(Error::Invalid(format!("duplicate client id {}", client.id)));
        }
        client.risk_limits()?;
        for symbol in &client.watchlist {
            if !symbols.contains(symbol.as_str()) {
                return Err(Error::Invalid(format!(
                    "{}: watchlist symbol {} is not a configured instrument",
                    client.id, symbol
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROSTER: &str = r#"
        [[instruments]]
        symbol = "NSE:ACME"
        day_open = 100.0

        [[instruments]]
        symbol = "NSE:ZETA"
        day_open = 52.5

        [[clients]]
        id = "c1"
        sizing = { mode = "capital", value = "10000" }
        max_daily_loss = -5000.0
        max_daily_profit = 10000.0
        watchlist = ["NSE:ACME", "NSE:ZETA"]

        [[clients]]
        id = "c2"
        enabled = false
        sizing = { mode = "quantity", value = "25" }
        max_daily_loss = -2000.0
        max_daily_profit = 4000.0
        watchlist = ["NSE:ACME"]
    "#;

    #[test]
    fn parses_and_validates_a_roster() {
        let roster: ClientsConfig = toml::from_str(ROSTER).unwrap();
        validate_roster(&roster).unwrap();
        assert_eq!(roster.clients.len(), 2);
        assert!(!roster.clients[1].enabled);
        let limits = roster.clients[0].risk_limits().unwrap();
        assert!(limits.max_daily_loss < rust_decimal::Decimal::ZERO);
    }

    #[test]
    fn rejects_unknown_watchlist_symbol() {
        let mut roster: ClientsConfig = toml::from_str(ROSTER).unwrap();
        roster.clients[0].watchlist.push("NSE:GHOST".to_string());
        assert!(validate_roster(&roster).is_err());
    }

    #[test]
    fn rejects_duplicate_client_ids() {
        let mut roster: ClientsConfig = toml::from_str(ROSTER).unwrap();
        roster.clients[1].id = "c1".to_string();
        assert!(validate_roster(&roster).is_err());
    }

    #[test]
    fn rejects_positive_loss_bound() {
        let mut roster: ClientsConfig = toml::from_str(ROSTER).unwrap();
        roster.clients[0].max_daily_loss = 5000.0;
        assert!(validate_roster(&roster).is_err());
    }

    #[test]
    fn default_session_settings_are_consistent() {
        let session = SessionSettings::default();
        assert!(session.no_new_entry_after < session.square_off_time);
        assert_eq!(session.exchange_utc_offset_minutes, 330);
    }
}
