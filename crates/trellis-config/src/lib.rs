//! Configuration system for the Trellis session engine.
//!
//! Provides TOML-based configuration with:
//! - Session limits, timeouts and expiration strategy (`[session]`)
//! - Console and rotating-file logging (`[logging]`)
//! - Config file layering (XDG user config + project-local overrides)
//! - `TRELLIS_*` environment overrides
//!
//! ```ignore
//! let loaded = trellis_config::load_config(None)?;
//! let _guard = trellis_config::init_logging(&loaded.config.logging())?;
//! let registry = SessionRegistry::new(loaded.config.registry_config())?;
//! ```

pub mod discovery;
pub mod error;
pub mod logging;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use logging::init_logging;
pub use types::*;
