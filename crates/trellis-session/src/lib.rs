//! Session cache and expiration engine for the Trellis servlet container.
//!
//! This crate provides server-side session identity with:
//! - A bounded, LRU-ordered live cache with removal listeners
//! - Collision-checked, cookie-safe identifiers from a strong random source
//! - Inactivity expiration, either one timer per session or a periodic sweep
//! - An accounting ledger that explains why a lookup failed
//! - Ordered lifecycle and attribute listeners with failure isolation
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_session::{RegistryConfig, SessionRegistry, SessionStatus};
//!
//! let registry = SessionRegistry::new(
//!     RegistryConfig::default()
//!         .with_max_sessions(1000)
//!         .with_default_timeout_secs(1800),
//! )?;
//!
//! let session = registry.create("/shop")?;
//! session.set_attribute("cart", Arc::new(Vec::<u32>::new()))?;
//!
//! registry.invalidate(session.id())?;
//! assert!(registry.lookup(session.id()).is_none());
//! assert_eq!(registry.diagnose(session.id()), SessionStatus::Invalidated);
//! ```

mod cache;
mod config;
mod error;
mod http;
mod id;
mod ledger;
mod listener;
mod registry;
mod scheduler;
mod session;

pub use cache::{BoundedCache, CacheListener};
pub use config::{
    DEFAULT_ID_BYTES, DEFAULT_LEDGER_MULTIPLIER, DEFAULT_MAX_ID_ATTEMPTS, DEFAULT_MAX_SESSIONS,
    DEFAULT_SWEEP_INTERVAL, DEFAULT_TIMEOUT_SECS, ExpirationStrategy, HasSessionConfig,
    RegistryConfig,
};
pub use error::{Error, Result};
pub use http::{SessionRequest, SessionResponse};
pub use id::IdentifierGenerator;
pub use ledger::{AccountingLedger, AccountingRecord, SessionStatus};
pub use listener::{
    AttributeEvent, AttributeListener, ListenerFanout, ListenerResult, SessionListener,
};
pub use registry::{RegistryStats, SessionRegistry};
pub use scheduler::{
    ExpirationScheduler, ExpirySink, SweepScheduler, TimerScheduler, build_scheduler,
};
pub use session::{AttributeValue, Session};
