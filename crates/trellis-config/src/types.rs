//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [session]              # session engine limits and timeouts
//! [session.expiration]   # expiration strategy
//! [logging]              # tracing filter and format
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trellis_session::{ExpirationStrategy, HasSessionConfig, RegistryConfig};

use crate::error::{ConfigError, Result};

/// Minimum random bytes per session identifier.
const MIN_ID_BYTES: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrellisConfig {
    /// Session engine configuration.
    pub session: Option<SessionConfig>,

    /// Logging configuration.
    pub logging: Option<LoggingConfig>,
}

impl TrellisConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: TrellisConfig) {
        if other.session.is_some() {
            self.session = other.session;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Session section, or defaults if absent.
    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    /// Logging section, or defaults if absent.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Registry configuration derived from the session section.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::from_provider(&self.session())
    }

    /// Apply `TRELLIS_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_SESSIONS) {
            let mut session = self.session();
            session.max_sessions = parse_env(ENV_MAX_SESSIONS, &raw)?;
            self.session = Some(session);
        }

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let mut session = self.session();
            session.timeout_secs = parse_env(ENV_TIMEOUT_SECS, &raw)?;
            self.session = Some(session);
        }

        if let Some(filter) = lookup(ENV_LOG).filter(|f| !f.is_empty()) {
            let mut logging = self.logging();
            logging.filter = filter;
            self.logging = Some(logging);
        }

        Ok(())
    }

    /// Check every section for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref session) = self.session {
            session.validate()?;
        }
        Ok(())
    }
}

/// Overrides `session.max_sessions`.
pub const ENV_MAX_SESSIONS: &str = "TRELLIS_SESSION_MAX_SESSIONS";

/// Overrides `session.timeout_secs`.
pub const ENV_TIMEOUT_SECS: &str = "TRELLIS_SESSION_TIMEOUT_SECS";

/// Overrides `logging.filter`.
pub const ENV_LOG: &str = "TRELLIS_LOG";

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, format!("'{raw}': {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session engine configuration.
///
/// ```toml
/// [session]
/// max_sessions = 10000
/// timeout_secs = 1800
/// ledger_multiplier = 5
///
/// [session.expiration]
/// strategy = "sweep"
/// sweep_interval_ms = 500
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of live sessions before LRU eviction.
    pub max_sessions: usize,
    /// Default inactivity timeout in seconds. Negative means never.
    pub timeout_secs: i64,
    /// Accounting ledger size as a multiple of peak live sessions.
    pub ledger_multiplier: usize,
    /// Random bytes per session identifier.
    pub id_bytes: usize,
    /// Identifier draws before giving up.
    pub max_id_attempts: usize,
    /// Expiration strategy.
    pub expiration: ExpirationConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: trellis_session::DEFAULT_MAX_SESSIONS,
            timeout_secs: trellis_session::DEFAULT_TIMEOUT_SECS,
            ledger_multiplier: trellis_session::DEFAULT_LEDGER_MULTIPLIER,
            id_bytes: trellis_session::DEFAULT_ID_BYTES,
            max_id_attempts: trellis_session::DEFAULT_MAX_ID_ATTEMPTS,
            expiration: ExpirationConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Check values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(ConfigError::invalid("session.max_sessions", "must be at least 1"));
        }
        if self.ledger_multiplier == 0 {
            return Err(ConfigError::invalid(
                "session.ledger_multiplier",
                "must be at least 1",
            ));
        }
        if self.id_bytes < MIN_ID_BYTES {
            return Err(ConfigError::invalid(
                "session.id_bytes",
                format!("must be at least {MIN_ID_BYTES}"),
            ));
        }
        if self.max_id_attempts == 0 {
            return Err(ConfigError::invalid(
                "session.max_id_attempts",
                "must be at least 1",
            ));
        }
        if let ExpirationConfig::Sweep { sweep_interval_ms: 0 } = self.expiration {
            return Err(ConfigError::invalid(
                "session.expiration.sweep_interval_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl HasSessionConfig for SessionConfig {
    fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    fn default_timeout_secs(&self) -> i64 {
        self.timeout_secs
    }

    fn ledger_multiplier(&self) -> usize {
        self.ledger_multiplier
    }

    fn expiration(&self) -> ExpirationStrategy {
        self.expiration.into()
    }

    fn id_bytes(&self) -> usize {
        self.id_bytes
    }

    fn max_id_attempts(&self) -> usize {
        self.max_id_attempts
    }
}

/// Expiration strategy as written in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ExpirationConfig {
    /// One timer per live session.
    #[default]
    Timer,
    /// One background sweep loop.
    Sweep {
        #[serde(default = "default_sweep_interval_ms")]
        sweep_interval_ms: u64,
    },
}

fn default_sweep_interval_ms() -> u64 {
    trellis_session::DEFAULT_SWEEP_INTERVAL.as_millis() as u64
}

impl From<ExpirationConfig> for ExpirationStrategy {
    fn from(config: ExpirationConfig) -> Self {
        match config {
            ExpirationConfig::Timer => ExpirationStrategy::TimerPerSession,
            ExpirationConfig::Sweep { sweep_interval_ms } => ExpirationStrategy::PeriodicSweep {
                interval: Duration::from_millis(sweep_interval_ms),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration.
///
/// ```toml
/// [logging]
/// filter = "trellis_session=debug,info"
/// json = false
/// file_dir = "/var/log/trellis"   # optional rolling JSON log
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive string for console output.
    pub filter: String,
    /// Emit JSON lines on the console instead of human-readable output.
    pub json: bool,
    /// Directory for a daily-rotated JSON log file.
    pub file_dir: Option<PathBuf>,
    /// `EnvFilter` directive string for the log file.
    pub file_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "trellis_session=info,trellis_config=info,warn".to_string(),
            json: false,
            file_dir: None,
            file_filter: "trellis_session=trace,trellis_config=trace,info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TrellisConfig::from_toml("").unwrap();
        assert!(config.session.is_none());

        let registry = config.registry_config();
        assert_eq!(registry.max_sessions, trellis_session::DEFAULT_MAX_SESSIONS);
        assert_eq!(registry.expiration, ExpirationStrategy::TimerPerSession);
    }

    #[test]
    fn test_parse_session_section() {
        let config = TrellisConfig::from_toml(
            r#"
[session]
max_sessions = 500
timeout_secs = -1

[session.expiration]
strategy = "sweep"
sweep_interval_ms = 250

[logging]
json = true
"#,
        )
        .unwrap();

        let session = config.session();
        assert_eq!(session.max_sessions, 500);
        assert_eq!(session.timeout_secs, -1);
        assert_eq!(session.ledger_multiplier, 5);
        assert!(config.logging().json);

        let registry = config.registry_config();
        assert_eq!(
            registry.expiration,
            ExpirationStrategy::PeriodicSweep {
                interval: Duration::from_millis(250)
            }
        );
        assert_eq!(registry.default_timeout_secs, -1);
    }

    #[test]
    fn test_sweep_interval_defaults() {
        let config = TrellisConfig::from_toml(
            r#"
[session.expiration]
strategy = "sweep"
"#,
        )
        .unwrap();
        assert_eq!(
            config.session().expiration,
            ExpirationConfig::Sweep {
                sweep_interval_ms: 500
            }
        );
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result = TrellisConfig::from_toml(
            r#"
[session.expiration]
strategy = "psychic"
"#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut config = TrellisConfig::new();
        config.session = Some(SessionConfig {
            max_sessions: 3,
            ..Default::default()
        });
        let parsed = TrellisConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed.session(), config.session());
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = TrellisConfig::from_toml("[session]\nmax_sessions = 1\n").unwrap();
        base.merge(TrellisConfig::from_toml("[session]\nmax_sessions = 2\n").unwrap());
        assert_eq!(base.session().max_sessions, 2);

        base.merge(TrellisConfig::from_toml("[logging]\njson = true\n").unwrap());
        assert_eq!(base.session().max_sessions, 2);
        assert!(base.logging().json);
    }

    #[test]
    fn test_validate() {
        let mut config = TrellisConfig::new();
        assert!(config.validate().is_ok());

        config.session = Some(SessionConfig {
            max_sessions: 0,
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        config.session = Some(SessionConfig {
            id_bytes: 8,
            ..Default::default()
        });
        assert!(config.validate().is_err());

        config.session = Some(SessionConfig {
            expiration: ExpirationConfig::Sweep {
                sweep_interval_ms: 0,
            },
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_MAX_SESSIONS, "12"),
            (ENV_TIMEOUT_SECS, " 30 "),
            (ENV_LOG, "trellis_session=trace"),
        ]
        .into_iter()
        .collect();

        let mut config = TrellisConfig::new();
        config
            .apply_env_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.session().max_sessions, 12);
        assert_eq!(config.session().timeout_secs, 30);
        assert_eq!(config.logging().filter, "trellis_session=trace");
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = TrellisConfig::new();
        let err = config
            .apply_env_from(|key| (key == ENV_MAX_SESSIONS).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == ENV_MAX_SESSIONS));
    }
}
