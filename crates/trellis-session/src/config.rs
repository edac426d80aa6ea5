//! Configuration for the session registry.

use std::time::Duration;

/// Default maximum number of live sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Default inactivity timeout for new sessions (30 minutes).
pub const DEFAULT_TIMEOUT_SECS: i64 = 1800;

/// Default ledger size as a multiple of the peak live-session count.
pub const DEFAULT_LEDGER_MULTIPLIER: usize = 5;

/// Default wake period for the sweep scheduler.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of random bytes behind each identifier.
/// 24 bytes encode to 32 URL-safe characters.
pub const DEFAULT_ID_BYTES: usize = 24;

/// Default number of identifier draws before giving up.
pub const DEFAULT_MAX_ID_ATTEMPTS: usize = 64;

/// How sessions are expired after inactivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationStrategy {
    /// One timer task per live session, rescheduled on every access.
    TimerPerSession,

    /// A single background loop over a deadline-ordered index.
    PeriodicSweep {
        /// Minimum spacing between two sweeps.
        interval: Duration,
    },
}

impl Default for ExpirationStrategy {
    fn default() -> Self {
        Self::TimerPerSession
    }
}

/// Configuration for a [`SessionRegistry`](crate::SessionRegistry).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of live sessions before LRU eviction.
    pub max_sessions: usize,

    /// Inactivity timeout given to new sessions, in seconds.
    /// Negative values mean sessions never expire.
    pub default_timeout_secs: i64,

    /// Ledger capacity as a multiple of the peak live-session count.
    pub ledger_multiplier: usize,

    /// Expiration strategy for this deployment.
    pub expiration: ExpirationStrategy,

    /// Random bytes drawn per identifier.
    pub id_bytes: usize,

    /// Identifier draws allowed before `IdentifierExhaustion`.
    pub max_id_attempts: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            ledger_multiplier: DEFAULT_LEDGER_MULTIPLIER,
            expiration: ExpirationStrategy::default(),
            id_bytes: DEFAULT_ID_BYTES,
            max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS,
        }
    }
}

impl RegistryConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from any session config provider.
    pub fn from_provider<C: HasSessionConfig>(provider: &C) -> Self {
        Self {
            max_sessions: provider.max_sessions(),
            default_timeout_secs: provider.default_timeout_secs(),
            ledger_multiplier: provider.ledger_multiplier(),
            expiration: provider.expiration(),
            id_bytes: provider.id_bytes(),
            max_id_attempts: provider.max_id_attempts(),
        }
    }

    /// Set the maximum number of live sessions.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the default inactivity timeout in seconds (negative = never).
    pub fn with_default_timeout_secs(mut self, secs: i64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// Set the ledger size multiplier.
    pub fn with_ledger_multiplier(mut self, multiplier: usize) -> Self {
        self.ledger_multiplier = multiplier;
        self
    }

    /// Select the expiration strategy.
    pub fn with_expiration(mut self, strategy: ExpirationStrategy) -> Self {
        self.expiration = strategy;
        self
    }

    /// Set the number of random bytes per identifier.
    pub fn with_id_bytes(mut self, bytes: usize) -> Self {
        self.id_bytes = bytes;
        self
    }

    /// Set the identifier attempt bound.
    pub fn with_max_id_attempts(mut self, attempts: usize) -> Self {
        self.max_id_attempts = attempts;
        self
    }

    /// Capacity actually used by the cache (never zero).
    pub(crate) fn cache_capacity(&self) -> usize {
        self.max_sessions.max(1)
    }
}

/// Session engine configuration capability.
///
/// Lets any configuration source build a [`RegistryConfig`] without this
/// crate knowing its layout.
pub trait HasSessionConfig: Clone + Send + Sync + 'static {
    /// Maximum number of live sessions before LRU eviction.
    fn max_sessions(&self) -> usize;

    /// Default inactivity timeout in seconds (negative = never).
    fn default_timeout_secs(&self) -> i64;

    /// Ledger capacity multiplier.
    fn ledger_multiplier(&self) -> usize {
        DEFAULT_LEDGER_MULTIPLIER
    }

    /// Expiration strategy.
    fn expiration(&self) -> ExpirationStrategy {
        ExpirationStrategy::default()
    }

    /// Random bytes per identifier.
    fn id_bytes(&self) -> usize {
        DEFAULT_ID_BYTES
    }

    /// Identifier attempt bound.
    fn max_id_attempts(&self) -> usize {
        DEFAULT_MAX_ID_ATTEMPTS
    }
}
