//! Lifecycle and attribute observers.
//!
//! Events are delivered synchronously on the calling thread, in
//! registration order. A listener that returns an error or panics is
//! logged and skipped; the remaining listeners still receive the event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::session::{AttributeValue, Session};

/// Outcome of a single listener call.
pub type ListenerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Attribute change delivered to [`AttributeListener`]s.
pub struct AttributeEvent<'a> {
    /// Session owning the attribute.
    pub session: &'a Session,
    /// Attribute name.
    pub name: &'a str,
    /// The new value for add, the old value for replace and remove.
    pub value: &'a AttributeValue,
}

/// Observer of session creation and destruction.
pub trait SessionListener: Send + Sync {
    /// A session was created and is live.
    fn session_created(&self, _session: &Session) -> ListenerResult {
        Ok(())
    }

    /// A session is being destroyed. Its attributes are still readable.
    fn session_destroyed(&self, _session: &Session) -> ListenerResult {
        Ok(())
    }
}

/// Observer of attribute changes.
pub trait AttributeListener: Send + Sync {
    fn attribute_added(&self, _event: &AttributeEvent<'_>) -> ListenerResult {
        Ok(())
    }

    fn attribute_replaced(&self, _event: &AttributeEvent<'_>) -> ListenerResult {
        Ok(())
    }

    fn attribute_removed(&self, _event: &AttributeEvent<'_>) -> ListenerResult {
        Ok(())
    }
}

/// Ordered observer lists with per-listener failure isolation.
#[derive(Default)]
pub struct ListenerFanout {
    session: RwLock<Vec<Arc<dyn SessionListener>>>,
    attribute: RwLock<Vec<Arc<dyn AttributeListener>>>,
}

impl ListenerFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a creation/destruction listener.
    pub fn add_session_listener(&self, listener: Arc<dyn SessionListener>) {
        self.session.write().push(listener);
    }

    /// Register an attribute listener.
    pub fn add_attribute_listener(&self, listener: Arc<dyn AttributeListener>) {
        self.attribute.write().push(listener);
    }

    /// Deliver a creation event. Returns the number of failed listeners.
    pub fn session_created(&self, session: &Session) -> usize {
        let listeners = self.session.read().clone();
        deliver(&listeners, "session_created", session.id(), |l| {
            l.session_created(session)
        })
    }

    /// Deliver a destruction event. Returns the number of failed listeners.
    pub fn session_destroyed(&self, session: &Session) -> usize {
        let listeners = self.session.read().clone();
        deliver(&listeners, "session_destroyed", session.id(), |l| {
            l.session_destroyed(session)
        })
    }

    pub fn attribute_added(&self, event: &AttributeEvent<'_>) -> usize {
        let listeners = self.attribute.read().clone();
        deliver(&listeners, "attribute_added", event.session.id(), |l| {
            l.attribute_added(event)
        })
    }

    pub fn attribute_replaced(&self, event: &AttributeEvent<'_>) -> usize {
        let listeners = self.attribute.read().clone();
        deliver(&listeners, "attribute_replaced", event.session.id(), |l| {
            l.attribute_replaced(event)
        })
    }

    pub fn attribute_removed(&self, event: &AttributeEvent<'_>) -> usize {
        let listeners = self.attribute.read().clone();
        deliver(&listeners, "attribute_removed", event.session.id(), |l| {
            l.attribute_removed(event)
        })
    }

    /// Number of registered session listeners.
    pub fn session_listener_count(&self) -> usize {
        self.session.read().len()
    }

    /// Number of registered attribute listeners.
    pub fn attribute_listener_count(&self) -> usize {
        self.attribute.read().len()
    }
}

fn deliver<L, F>(listeners: &[Arc<L>], event: &'static str, session_id: &str, call: F) -> usize
where
    L: ?Sized,
    F: Fn(&L) -> ListenerResult,
{
    let mut failures = 0;
    for (index, listener) in listeners.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| call(listener.as_ref()))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                warn!(event, index, session_id = %session_id, error = %e, "Session listener failed");
            }
            Err(_) => {
                failures += 1;
                warn!(event, index, session_id = %session_id, "Session listener panicked");
            }
        }
    }
    failures
}
