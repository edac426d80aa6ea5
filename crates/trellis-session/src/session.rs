//! The session handle handed to web applications.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::listener::AttributeEvent;
use crate::registry::RegistryInner;

/// Opaque attribute value.
pub type AttributeValue = Arc<dyn Any + Send + Sync>;

const LIVE: u8 = 0;
const INVALIDATING: u8 = 1;
const INVALIDATED: u8 = 2;

/// Housekeeping fields. Only the registry writes these.
#[derive(Debug)]
pub(crate) struct Housekeeping {
    last_accessed: Instant,
    last_accessed_at: DateTime<Utc>,
    access_count: u64,
    timeout_secs: i64,
    is_new: bool,
}

/// A server-side session.
///
/// Shared as `Arc<Session>`; the registry owns the live set and the session
/// only keeps a non-owning handle back to it. Every accessor except
/// [`id`](Self::id), [`context`](Self::context) and
/// [`is_invalidated`](Self::is_invalidated) fails with
/// [`Error::InvalidSessionAccess`] once the session has been invalidated.
pub struct Session {
    id: String,
    context: String,
    created_at: DateTime<Utc>,
    housekeeping: Mutex<Housekeeping>,
    lifecycle: AtomicU8,
    attributes: Mutex<HashMap<String, AttributeValue>>,
    registry: Weak<RegistryInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("created_at", &self.created_at)
            .field("lifecycle", &self.lifecycle.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        id: String,
        context: String,
        timeout_secs: i64,
        registry: Weak<RegistryInner>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            context,
            created_at: now,
            housekeeping: Mutex::new(Housekeeping {
                last_accessed: Instant::now(),
                last_accessed_at: now,
                access_count: 0,
                timeout_secs,
                is_new: true,
            }),
            lifecycle: AtomicU8::new(LIVE),
            attributes: Mutex::new(HashMap::new()),
            registry,
        }
    }

    /// A session with no owning registry. Attribute changes fire no events.
    pub(crate) fn detached(id: &str, timeout_secs: i64) -> Self {
        Self::new(id.to_string(), String::new(), timeout_secs, Weak::new())
    }

    /// The session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Web application that created this session.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Whether invalidation has begun or completed.
    pub fn is_invalidated(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) != LIVE
    }

    /// Wall-clock creation time.
    pub fn creation_time(&self) -> Result<DateTime<Utc>> {
        self.ensure_valid()?;
        Ok(self.created_at)
    }

    /// Wall-clock time of the last access through the registry.
    pub fn last_accessed_time(&self) -> Result<DateTime<Utc>> {
        self.ensure_valid()?;
        Ok(self.housekeeping.lock().last_accessed_at)
    }

    /// Number of lookups that found this session.
    pub fn access_count(&self) -> Result<u64> {
        self.ensure_valid()?;
        Ok(self.housekeeping.lock().access_count)
    }

    /// Inactivity timeout in seconds. Negative means never.
    pub fn max_inactive_interval(&self) -> Result<i64> {
        self.ensure_valid()?;
        Ok(self.housekeeping.lock().timeout_secs)
    }

    /// Change the inactivity timeout and reschedule expiration.
    pub fn set_max_inactive_interval(&self, secs: i64) -> Result<()> {
        self.ensure_valid()?;
        match self.registry.upgrade() {
            Some(registry) => registry.set_timeout(&self.id, secs),
            None => {
                self.while_live(|hk| hk.set_timeout_secs(secs));
                Ok(())
            }
        }
    }

    /// True until the session is first found by a lookup.
    pub fn is_new(&self) -> Result<bool> {
        self.ensure_valid()?;
        Ok(self.housekeeping.lock().is_new)
    }

    /// Get an attribute.
    pub fn attribute(&self, name: &str) -> Result<Option<AttributeValue>> {
        self.ensure_valid()?;
        Ok(self.attributes.lock().get(name).cloned())
    }

    /// Get an attribute downcast to a concrete type.
    ///
    /// Returns `None` if the attribute is absent or has another type.
    pub fn attribute_as<T: Any + Send + Sync>(&self, name: &str) -> Result<Option<Arc<T>>> {
        Ok(self
            .attribute(name)?
            .and_then(|value| value.downcast::<T>().ok()))
    }

    /// Names of all bound attributes, in no particular order.
    pub fn attribute_names(&self) -> Result<Vec<String>> {
        self.ensure_valid()?;
        Ok(self.attributes.lock().keys().cloned().collect())
    }

    /// Bind an attribute, firing an added or replaced event.
    ///
    /// Does not count as an access. Fails once invalidation has begun, so
    /// destroy listeners cannot bind values that would never be unbound.
    pub fn set_attribute(&self, name: impl Into<String>, value: AttributeValue) -> Result<()> {
        if !self.is_live() {
            return Err(Error::InvalidSessionAccess(self.id.clone()));
        }
        let name = name.into();
        let previous = self
            .attributes
            .lock()
            .insert(name.clone(), Arc::clone(&value));

        if let Some(registry) = self.registry.upgrade() {
            match previous {
                Some(old) => {
                    registry.listeners.attribute_replaced(&AttributeEvent {
                        session: self,
                        name: &name,
                        value: &old,
                    });
                }
                None => {
                    registry.listeners.attribute_added(&AttributeEvent {
                        session: self,
                        name: &name,
                        value: &value,
                    });
                }
            }
        }
        Ok(())
    }

    /// Unbind an attribute, firing a removed event if it was bound.
    pub fn remove_attribute(&self, name: &str) -> Result<Option<AttributeValue>> {
        self.ensure_valid()?;
        let removed = self.attributes.lock().remove(name);

        if let (Some(value), Some(registry)) = (&removed, self.registry.upgrade()) {
            registry.listeners.attribute_removed(&AttributeEvent {
                session: self,
                name,
                value,
            });
        }
        Ok(removed)
    }

    /// Invalidate this session through its registry.
    pub fn invalidate(&self) -> Result<()> {
        if self.is_invalidated() {
            return Err(Error::DuplicateInvalidate(self.id.clone()));
        }
        match self.registry.upgrade() {
            Some(registry) => registry.invalidate(&self.id),
            None => {
                if !self.begin_invalidation() {
                    return Err(Error::DuplicateInvalidate(self.id.clone()));
                }
                self.take_attributes();
                self.finish_invalidation();
                Ok(())
            }
        }
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.lifecycle.load(Ordering::Acquire) == INVALIDATED {
            Err(Error::InvalidSessionAccess(self.id.clone()))
        } else {
            Ok(())
        }
    }

    // Registry-side housekeeping

    /// Run `f` on the housekeeping state while the session is still live.
    ///
    /// [`begin_invalidation`](Self::begin_invalidation) takes the same lock,
    /// so `f` runs entirely before invalidation begins or not at all.
    pub(crate) fn while_live<R>(&self, f: impl FnOnce(&mut Housekeeping) -> R) -> Option<R> {
        let mut hk = self.housekeeping.lock();
        if !self.is_live() {
            return None;
        }
        Some(f(&mut hk))
    }

    pub(crate) fn is_invalidating(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == INVALIDATING
    }

    pub(crate) fn is_live(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == LIVE
    }

    /// Claim the right to invalidate. Only the first caller wins.
    pub(crate) fn begin_invalidation(&self) -> bool {
        let _hk = self.housekeeping.lock();
        self.lifecycle
            .compare_exchange(LIVE, INVALIDATING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn take_attributes(&self) -> Vec<(String, AttributeValue)> {
        self.attributes.lock().drain().collect()
    }

    pub(crate) fn finish_invalidation(&self) {
        self.lifecycle.store(INVALIDATED, Ordering::Release);
    }
}

impl Housekeeping {
    /// Record an access and return the new expiration deadline.
    pub(crate) fn touch(&mut self) -> Option<Instant> {
        self.last_accessed = Instant::now();
        self.last_accessed_at = Utc::now();
        self.access_count += 1;
        self.is_new = false;
        self.deadline()
    }

    /// When the session expires, or `None` if it never does.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        u64::try_from(self.timeout_secs)
            .ok()
            .and_then(|secs| self.last_accessed.checked_add(Duration::from_secs(secs)))
    }

    /// Whether the inactivity window has fully elapsed at `now`.
    pub(crate) fn is_expired_at(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    pub(crate) fn set_timeout_secs(&mut self, secs: i64) -> Option<Instant> {
        self.timeout_secs = secs;
        self.deadline()
    }
}
