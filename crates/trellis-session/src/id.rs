//! Session identifier generation.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use tracing::warn;

use crate::error::{Error, Result};

type EntropySource = Box<dyn Fn(&mut [u8]) + Send + Sync>;

/// Produces cookie- and URL-safe identifiers from a strong random source.
///
/// Identifiers are `id_bytes` random bytes encoded as unpadded URL-safe
/// base64, so they contain only `A-Z a-z 0-9 - _`.
pub struct IdentifierGenerator {
    id_bytes: usize,
    max_attempts: usize,
    source: EntropySource,
}

impl IdentifierGenerator {
    /// Create a generator backed by the thread-local CSPRNG.
    pub fn new(id_bytes: usize, max_attempts: usize) -> Self {
        Self::with_source(id_bytes, max_attempts, |buf| rand::rng().fill_bytes(buf))
    }

    /// Create a generator with a custom entropy source.
    pub fn with_source<F>(id_bytes: usize, max_attempts: usize, source: F) -> Self
    where
        F: Fn(&mut [u8]) + Send + Sync + 'static,
    {
        Self {
            id_bytes: id_bytes.max(1),
            max_attempts: max_attempts.max(1),
            source: Box::new(source),
        }
    }

    /// Draw one identifier without any collision check.
    pub fn draw(&self) -> String {
        let mut bytes = vec![0u8; self.id_bytes];
        (self.source)(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Draw identifiers until `in_use` rejects none of them.
    ///
    /// `in_use` should cover both live sessions and recently terminated
    /// ones so a just-destroyed identifier is never handed out again.
    pub fn generate<F>(&self, in_use: F) -> Result<String>
    where
        F: Fn(&str) -> bool,
    {
        for attempt in 1..=self.max_attempts {
            let id = self.draw();
            if !in_use(&id) {
                return Ok(id);
            }
            warn!(attempt, "Session identifier collision, drawing again");
        }
        Err(Error::IdentifierExhaustion {
            attempts: self.max_attempts,
        })
    }

    /// Attempt bound used by [`generate`](Self::generate).
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}
