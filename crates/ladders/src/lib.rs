pub mod error;
pub mod targets;
pub mod trailing;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use targets::{TargetFire, TargetLadder, TargetLadderState};
pub use trailing::{TrailingLadder, TrailingStopState, TrailingUpdate};
pub use types::{
    TargetLadderSettings, TargetLevelSettings, TrailingLadderSettings, TrailingLevelSettings,
};
