//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use trellis_session::{
    ListenerResult, RegistryConfig, Session, SessionListener, SessionRegistry, SessionRequest,
    SessionResponse,
};

/// Install a test-friendly tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("trellis_session=debug")
        .with_test_writer()
        .try_init();
}

/// Build a registry on the current runtime.
pub fn registry(config: RegistryConfig) -> SessionRegistry {
    init_tracing();
    SessionRegistry::new(config).expect("registry needs a runtime")
}

/// Records lifecycle events as `"<tag>:<event>:<id>"`.
pub struct Recorder {
    pub tag: &'static str,
    pub log: Arc<Mutex<Vec<String>>>,
    pub fail_on_destroy: bool,
}

impl Recorder {
    pub fn new(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            tag,
            log: Arc::clone(log),
            fail_on_destroy: false,
        })
    }

    pub fn failing(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            tag,
            log: Arc::clone(log),
            fail_on_destroy: true,
        })
    }
}

impl SessionListener for Recorder {
    fn session_created(&self, session: &Session) -> ListenerResult {
        self.log
            .lock()
            .push(format!("{}:created:{}", self.tag, session.id()));
        Ok(())
    }

    fn session_destroyed(&self, session: &Session) -> ListenerResult {
        self.log
            .lock()
            .push(format!("{}:destroyed:{}", self.tag, session.id()));
        if self.fail_on_destroy {
            return Err(format!("{} refused to observe destruction", self.tag).into());
        }
        Ok(())
    }
}

/// Minimal request carrying an optional session identifier.
pub struct FakeRequest {
    pub session_id: Option<String>,
    pub context: String,
}

impl FakeRequest {
    pub fn new(session_id: Option<&str>) -> Self {
        Self {
            session_id: session_id.map(str::to_string),
            context: "/app".to_string(),
        }
    }
}

impl SessionRequest for FakeRequest {
    fn requested_session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn context_path(&self) -> &str {
        &self.context
    }
}

/// Response that remembers the identifier it was told to issue.
#[derive(Default)]
pub struct FakeResponse {
    pub issued: Option<String>,
}

impl SessionResponse for FakeResponse {
    fn set_session_id(&mut self, id: &str) {
        self.issued = Some(id.to_string());
    }
}
