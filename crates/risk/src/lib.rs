pub mod error;
pub mod governor;

// Re-export public types
pub use error::{Error, Result};
pub use governor::{RiskGovernor, RiskVerdict, TradePermit};
