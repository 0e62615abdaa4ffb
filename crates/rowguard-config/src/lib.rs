//! Configuration for rowguard
//!
//! Settings come from `<config dir>/rowguard/config.toml` with
//! `ROWGUARD__SECTION__KEY` environment overrides:
//!
//! ```no_run
//! use rowguard_config::{init_tracing, ConfigManager};
//!
//! let config = ConfigManager::new().load_config()?;
//! init_tracing(&config.logging)?;
//! # Ok::<(), rowguard_config::ConfigError>(())
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod manager;
pub mod telemetry;
pub mod types;

pub use error::{ConfigError, ConfigResult};
pub use manager::{ConfigManager, DEFAULT_ENV_PREFIX};
pub use telemetry::init_tracing;
pub use types::{
    LedgerSettings, LoggingSettings, RowguardConfig, SnapshotSettings, StorageSettings,
    UndoSettings,
};
