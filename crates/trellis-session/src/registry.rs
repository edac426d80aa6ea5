//! Session registry: the single mutation path for session identity.
//!
//! The registry owns the live cache, the accounting ledger, the identifier
//! generator, the listener fan-out and the expiration scheduler. Every
//! termination path (invalidate, eviction, expiration) converges on the same
//! steps: ledger updated, pending expiration cancelled, destroy and unbind
//! notifications fired, cache entry removed.

use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cache::{BoundedCache, CacheListener};
use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::http::{SessionRequest, SessionResponse};
use crate::id::IdentifierGenerator;
use crate::ledger::{AccountingLedger, AccountingRecord, SessionStatus};
use crate::listener::{AttributeEvent, AttributeListener, ListenerFanout, SessionListener};
use crate::scheduler::{ExpirationScheduler, ExpirySink, build_scheduler};
use crate::session::Session;

/// Coordinator of session identity, timeout and lifecycle notification.
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    config: RegistryConfig,
    cache: BoundedCache<String, Arc<Session>>,
    ledger: AccountingLedger,
    ids: IdentifierGenerator,
    pub(crate) listeners: ListenerFanout,
    scheduler: Box<dyn ExpirationScheduler>,
    this: Weak<RegistryInner>,
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Live sessions.
    pub live: usize,
    /// Maximum live sessions.
    pub capacity: usize,
    /// Highest live count observed.
    pub peak_live: usize,
    /// Ledger records held.
    pub ledger_len: usize,
    /// Current ledger capacity.
    pub ledger_capacity: usize,
    /// Pending expirations.
    pub scheduled: usize,
}

impl SessionRegistry {
    /// Create a registry on the current Tokio runtime.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Ok(Self::with_runtime(config, runtime))
    }

    /// Create a registry whose expiration work runs on `runtime`.
    pub fn with_runtime(config: RegistryConfig, runtime: Handle) -> Self {
        Self::with_generator(
            IdentifierGenerator::new(config.id_bytes, config.max_id_attempts),
            config,
            runtime,
        )
    }

    /// Create a registry with a custom identifier generator.
    pub fn with_generator(ids: IdentifierGenerator, config: RegistryConfig, runtime: Handle) -> Self {
        let inner = Arc::new_cyclic(|this: &Weak<RegistryInner>| {
            let sink: Weak<dyn ExpirySink> = this.clone();
            let cache = BoundedCache::new(config.cache_capacity());
            cache.register_listener(Arc::new(TerminationListener {
                registry: this.clone(),
            }));

            RegistryInner {
                scheduler: build_scheduler(config.expiration, runtime, sink),
                ledger: AccountingLedger::new(config.ledger_multiplier),
                listeners: ListenerFanout::new(),
                ids,
                cache,
                config,
                this: this.clone(),
            }
        });

        debug!(
            max_sessions = inner.config.cache_capacity(),
            default_timeout_secs = inner.config.default_timeout_secs,
            expiration = ?inner.config.expiration,
            "Session registry started"
        );
        Self { inner }
    }

    /// Registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Create a new session for the web application `context`.
    pub fn create(&self, context: &str) -> Result<Arc<Session>> {
        self.inner.create(context)
    }

    /// Find a live session, counting it as accessed.
    ///
    /// Unknown, expired, evicted and invalidated identifiers all come back as
    /// `None`; [`diagnose`](Self::diagnose) tells them apart.
    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.lookup(id)
    }

    /// Terminate a session on behalf of the application.
    pub fn invalidate(&self, id: &str) -> Result<()> {
        self.inner.invalidate(id)
    }

    /// Change a session's inactivity timeout. Negative disables expiration.
    pub fn set_timeout(&self, id: &str, secs: i64) -> Result<()> {
        self.inner.set_timeout(id, secs)
    }

    /// Last known state of an identifier.
    pub fn diagnose(&self, id: &str) -> SessionStatus {
        self.inner.ledger.status(id)
    }

    /// Full ledger record for an identifier.
    pub fn diagnose_record(&self, id: &str) -> Option<AccountingRecord> {
        self.inner.ledger.record(id)
    }

    /// Resolve the session for a request, creating one if asked to.
    ///
    /// A newly created session's identifier is handed to the response.
    pub fn get_session<Req, Resp>(
        &self,
        request: &Req,
        response: &mut Resp,
        create: bool,
    ) -> Result<Option<Arc<Session>>>
    where
        Req: SessionRequest + ?Sized,
        Resp: SessionResponse + ?Sized,
    {
        if let Some(session) = request.requested_session_id().and_then(|id| self.lookup(id)) {
            return Ok(Some(session));
        }
        if !create {
            return Ok(None);
        }
        let session = self.create(request.context_path())?;
        response.set_session_id(session.id());
        Ok(Some(session))
    }

    /// Whether the identifier a request carries names a live session.
    ///
    /// Does not count as an access.
    pub fn is_requested_session_id_valid<Req>(&self, request: &Req) -> bool
    where
        Req: SessionRequest + ?Sized,
    {
        request
            .requested_session_id()
            .and_then(|id| self.inner.cache.peek(id))
            .is_some_and(|session| session.is_live())
    }

    /// Register a creation/destruction listener.
    pub fn add_session_listener(&self, listener: Arc<dyn SessionListener>) {
        self.inner.listeners.add_session_listener(listener);
    }

    /// Register an attribute listener.
    pub fn add_attribute_listener(&self, listener: Arc<dyn AttributeListener>) {
        self.inner.listeners.add_attribute_listener(listener);
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.cache.size()
    }

    /// Whether there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.inner.cache.is_empty()
    }

    /// Identifiers of live sessions, most recently used first.
    pub fn live_ids(&self) -> Vec<String> {
        self.inner.cache.keys()
    }

    /// Registry statistics.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live: self.inner.cache.size(),
            capacity: self.inner.cache.capacity(),
            peak_live: self.inner.ledger.peak(),
            ledger_len: self.inner.ledger.len(),
            ledger_capacity: self.inner.ledger.capacity(),
            scheduled: self.inner.scheduler.pending(),
        }
    }

    /// Stop expiration work and drop every session without notification.
    pub fn shutdown(&self) {
        self.inner.scheduler.shutdown();
        self.inner.cache.clear();
        debug!("Session registry shut down");
    }
}

impl RegistryInner {
    fn create(&self, context: &str) -> Result<Arc<Session>> {
        let timeout = self.config.default_timeout_secs;

        for _ in 0..self.ids.max_attempts() {
            let id = self
                .ids
                .generate(|candidate| self.cache.contains(candidate) || self.ledger.contains(candidate))?;
            let session = Arc::new(Session::new(
                id.clone(),
                context.to_string(),
                timeout,
                self.this.clone(),
            ));

            // Another creator may have claimed the same identifier since the check.
            // The ledger records `Active` before the session becomes evictable.
            if !self.ledger.claim(&id)
                || self.cache.put_if_absent(id.clone(), Arc::clone(&session)).is_err()
            {
                continue;
            }
            self.ledger.observe_live(self.cache.size());

            let live = session
                .while_live(|hk| {
                    if let Some(deadline) = hk.deadline() {
                        self.scheduler.schedule(&id, deadline);
                    }
                })
                .is_some();
            if !live {
                // Evicted by a concurrent create before it was announced
                debug!(session_id = %id, "Session evicted before creation completed");
                return Ok(session);
            }
            self.listeners.session_created(&session);

            debug!(session_id = %id, context = %context, timeout_secs = timeout, "Session created");
            return Ok(session);
        }

        Err(Error::IdentifierExhaustion {
            attempts: self.ids.max_attempts(),
        })
    }

    fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        let Some(session) = self.cache.get(id) else {
            self.ledger.record_miss(id);
            trace!(session_id = %id, "Session lookup missed");
            return None;
        };

        // Scheduling and the ledger write happen under the session's
        // housekeeping lock, which invalidation must take before leaving LIVE.
        let now = Instant::now();
        let outcome = session.while_live(|hk| {
            if hk.is_expired_at(now) {
                return false;
            }
            match hk.touch() {
                Some(deadline) => self.scheduler.schedule(id, deadline),
                None => self.scheduler.cancel(id),
            }
            self.ledger.update(id, SessionStatus::Active);
            true
        });

        match outcome {
            Some(true) => {
                trace!(session_id = %id, "Session lookup hit");
                Some(session)
            }
            // The timer has not run yet
            Some(false) => {
                if self.terminate(&session, SessionStatus::Expired).is_ok() {
                    debug!(session_id = %id, "Session expired on access");
                }
                None
            }
            None => {
                self.ledger.record_miss(id);
                trace!(session_id = %id, "Session lookup found a terminated session");
                None
            }
        }
    }

    pub(crate) fn invalidate(&self, id: &str) -> Result<()> {
        match self.cache.peek(id) {
            Some(session) => self.terminate(&session, SessionStatus::Invalidated),
            None if self.ledger.status(id) == SessionStatus::Invalidated => {
                Err(Error::DuplicateInvalidate(id.to_string()))
            }
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    pub(crate) fn set_timeout(&self, id: &str, secs: i64) -> Result<()> {
        self.cache
            .peek(id)
            .and_then(|session| {
                session.while_live(|hk| match hk.set_timeout_secs(secs) {
                    Some(deadline) => self.scheduler.schedule(id, deadline),
                    None => self.scheduler.cancel(id),
                })
            })
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        debug!(session_id = %id, timeout_secs = secs, "Session timeout changed");
        Ok(())
    }

    /// Terminate a live session with the given terminal status.
    fn terminate(&self, session: &Arc<Session>, status: SessionStatus) -> Result<()> {
        let id = session.id();
        if !session.begin_invalidation() {
            return Err(Error::DuplicateInvalidate(id.to_string()));
        }

        self.ledger.update(id, status);
        self.scheduler.cancel(id);

        // Destroy notifications run from the cache's invalidation listener,
        // while the entry is still present.
        if self.cache.invalidate(&id.to_string()).is_none() {
            self.destroy(session);
        }

        debug!(session_id = %id, status = ?status, "Session terminated");
        Ok(())
    }

    /// Fire destroy and unbind notifications, then seal the session.
    fn destroy(&self, session: &Session) {
        if session.is_invalidating() {
            self.listeners.session_destroyed(session);
            for (name, value) in session.take_attributes() {
                self.listeners.attribute_removed(&AttributeEvent {
                    session,
                    name: &name,
                    value: &value,
                });
            }
        }
        session.finish_invalidation();
    }

    fn evicted(&self, session: &Session) {
        if !session.begin_invalidation() {
            // Already being terminated elsewhere
            return;
        }
        let id = session.id();
        self.ledger.update(id, SessionStatus::Evicted);
        self.scheduler.cancel(id);
        self.destroy(session);
        debug!(session_id = %id, "Session evicted to make room");
    }
}

impl ExpirySink for RegistryInner {
    fn expire(&self, id: &str) {
        let Some(session) = self.cache.peek(id) else {
            return;
        };

        let now = Instant::now();
        let due = session.while_live(|hk| match hk.deadline() {
            Some(deadline) if now >= deadline => true,
            // Accessed since this expiration was scheduled
            Some(deadline) => {
                self.scheduler.schedule(id, deadline);
                false
            }
            None => false,
        });

        if due == Some(true) && self.terminate(&session, SessionStatus::Expired).is_ok() {
            debug!(session_id = %id, "Session expired after inactivity");
        }
    }
}

/// Routes cache removals into the registry's termination path.
struct TerminationListener {
    registry: Weak<RegistryInner>,
}

impl CacheListener<String, Arc<Session>> for TerminationListener {
    fn on_evict(&self, _id: &String, session: &Arc<Session>) {
        if let Some(registry) = self.registry.upgrade() {
            registry.evicted(session);
        }
    }

    fn on_invalidate(&self, _id: &String, session: &Arc<Session>) {
        if let Some(registry) = self.registry.upgrade() {
            registry.destroy(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::listener::ListenerResult;

    fn registry(config: RegistryConfig) -> SessionRegistry {
        SessionRegistry::new(config).unwrap()
    }

    #[derive(Default)]
    struct Events {
        log: Mutex<Vec<String>>,
    }

    impl SessionListener for Events {
        fn session_created(&self, session: &Session) -> ListenerResult {
            self.log.lock().push(format!("created:{}", session.id()));
            Ok(())
        }

        fn session_destroyed(&self, session: &Session) -> ListenerResult {
            // Attributes are still readable here
            let bound = session.attribute_names()?.len();
            self.log
                .lock()
                .push(format!("destroyed:{}:{bound}", session.id()));
            Ok(())
        }
    }

    impl AttributeListener for Events {
        fn attribute_added(&self, event: &AttributeEvent<'_>) -> ListenerResult {
            self.log.lock().push(format!("added:{}", event.name));
            Ok(())
        }

        fn attribute_replaced(&self, event: &AttributeEvent<'_>) -> ListenerResult {
            let old = event.value.downcast_ref::<u32>().copied().unwrap_or_default();
            self.log.lock().push(format!("replaced:{}:{old}", event.name));
            Ok(())
        }

        fn attribute_removed(&self, event: &AttributeEvent<'_>) -> ListenerResult {
            self.log.lock().push(format!("removed:{}", event.name));
            Ok(())
        }
    }

    /// Creates one more session from inside the first creation event.
    struct CreateOnCreate {
        registry: Weak<RegistryInner>,
        fired: AtomicBool,
    }

    impl SessionListener for CreateOnCreate {
        fn session_created(&self, _session: &Session) -> ListenerResult {
            if !self.fired.swap(true, Ordering::SeqCst)
                && let Some(registry) = self.registry.upgrade()
            {
                registry.create("")?;
            }
            Ok(())
        }
    }

    /// Tries to bind an attribute while the session is being destroyed.
    #[derive(Default)]
    struct BindOnDestroy {
        refused: AtomicBool,
    }

    impl SessionListener for BindOnDestroy {
        fn session_destroyed(&self, session: &Session) -> ListenerResult {
            let refused = matches!(
                session.set_attribute("late", Arc::new(0u32)),
                Err(Error::InvalidSessionAccess(_))
            );
            self.refused.store(refused, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        assert!(matches!(
            SessionRegistry::new(RegistryConfig::new()),
            Err(Error::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let registry = registry(RegistryConfig::new());
        let session = registry.create("/app").unwrap();
        assert!(session.is_new().unwrap());
        assert_eq!(session.context(), "/app");
        assert_eq!(registry.diagnose(session.id()), SessionStatus::Active);

        let found = registry.lookup(session.id()).unwrap();
        assert!(Arc::ptr_eq(&session, &found));
        assert!(!found.is_new().unwrap());
        assert_eq!(found.access_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_lookup_records_not_found() {
        let registry = registry(RegistryConfig::new());
        assert!(registry.lookup("nope").is_none());
        assert_eq!(registry.diagnose("nope"), SessionStatus::NotFound);
        assert!(registry.diagnose_record("nope").is_some());
    }

    #[tokio::test]
    async fn test_invalidate_twice_fails_fast() {
        let registry = registry(RegistryConfig::new());
        let session = registry.create("").unwrap();
        let id = session.id().to_string();

        registry.invalidate(&id).unwrap();
        assert!(matches!(
            registry.invalidate(&id),
            Err(Error::DuplicateInvalidate(_))
        ));
        assert!(matches!(
            session.invalidate(),
            Err(Error::DuplicateInvalidate(_))
        ));
        assert!(matches!(
            registry.invalidate("never-existed"),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_and_attribute_events() {
        let registry = registry(RegistryConfig::new());
        let events = Arc::new(Events::default());
        registry.add_session_listener(events.clone());
        registry.add_attribute_listener(events.clone());

        let session = registry.create("").unwrap();
        let id = session.id().to_string();
        session.set_attribute("n", Arc::new(1u32)).unwrap();
        session.set_attribute("n", Arc::new(2u32)).unwrap();
        session.set_attribute("m", Arc::new(3u32)).unwrap();
        session.remove_attribute("m").unwrap();
        session.invalidate().unwrap();

        assert_eq!(
            *events.log.lock(),
            vec![
                format!("created:{id}"),
                "added:n".to_string(),
                "replaced:n:1".to_string(),
                "added:m".to_string(),
                "removed:m".to_string(),
                format!("destroyed:{id}:1"),
                "removed:n".to_string(),
            ]
        );
        assert!(session.is_invalidated());
        assert!(matches!(
            session.attribute("n"),
            Err(Error::InvalidSessionAccess(_))
        ));
    }

    #[tokio::test]
    async fn test_eviction_destroys_and_records() {
        let registry = registry(RegistryConfig::new().with_max_sessions(1));
        let events = Arc::new(Events::default());
        registry.add_session_listener(events.clone());

        let first = registry.create("").unwrap();
        let second = registry.create("").unwrap();

        assert_eq!(registry.len(), 1);
        assert!(first.is_invalidated());
        assert!(!second.is_invalidated());
        assert_eq!(registry.diagnose(first.id()), SessionStatus::Evicted);
        assert!(
            events
                .log
                .lock()
                .contains(&format!("destroyed:{}:0", first.id()))
        );
    }

    #[tokio::test]
    async fn test_eviction_during_creation_event_is_not_overwritten() {
        let registry = registry(RegistryConfig::new().with_max_sessions(1));
        registry.add_session_listener(Arc::new(CreateOnCreate {
            registry: Arc::downgrade(&registry.inner),
            fired: AtomicBool::new(false),
        }));

        let first = registry.create("").unwrap();

        assert!(first.is_invalidated());
        assert!(registry.lookup(first.id()).is_none());
        assert_eq!(registry.diagnose(first.id()), SessionStatus::Evicted);
        // Only the surviving session has a pending expiration
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.stats().scheduled, 1);
    }

    #[tokio::test]
    async fn test_destroy_listener_cannot_bind_attributes() {
        let registry = registry(RegistryConfig::new());
        let listener = Arc::new(BindOnDestroy::default());
        registry.add_session_listener(listener.clone());
        let events = Arc::new(Events::default());
        registry.add_attribute_listener(events.clone());

        let session = registry.create("").unwrap();
        session.invalidate().unwrap();

        assert!(listener.refused.load(Ordering::SeqCst));
        assert!(events.log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_set_timeout_negative_unschedules() {
        let registry = registry(RegistryConfig::new().with_default_timeout_secs(60));
        let session = registry.create("").unwrap();
        assert_eq!(registry.stats().scheduled, 1);

        session.set_max_inactive_interval(-1).unwrap();
        assert_eq!(session.max_inactive_interval().unwrap(), -1);
        assert_eq!(registry.stats().scheduled, 0);

        // Access must not schedule anything either
        registry.lookup(session.id()).unwrap();
        assert_eq!(registry.stats().scheduled, 0);

        assert!(matches!(
            registry.set_timeout("missing", 5),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_expires_overdue_session() {
        let registry = registry(RegistryConfig::new().with_default_timeout_secs(1));
        let session = registry.create("").unwrap();
        let id = session.id().to_string();

        // Either the timer or the lookup itself notices the elapsed window
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(registry.lookup(&id).is_none());
        assert_eq!(registry.diagnose(&id), SessionStatus::Expired);
    }

    #[tokio::test]
    async fn test_stats_and_shutdown() {
        let registry = registry(RegistryConfig::new().with_ledger_multiplier(5));
        for _ in 0..3 {
            registry.create("").unwrap();
        }

        let stats = registry.stats();
        assert_eq!(stats.live, 3);
        assert_eq!(stats.peak_live, 3);
        assert_eq!(stats.ledger_capacity, 15);
        assert_eq!(stats.scheduled, 3);
        assert_eq!(registry.live_ids().len(), 3);

        registry.shutdown();
        assert!(registry.is_empty());
        assert_eq!(registry.stats().scheduled, 0);
    }
}
