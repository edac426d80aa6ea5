//! Accounting ledger of recent session states.
//!
//! The ledger remembers the last known state of recently live identifiers so
//! a failed lookup can later be explained. It is pruned LRU-style and sized
//! as a multiple of the peak live-session count; it is independent of the
//! live cache and outlives the entries it describes.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;

/// Last known state of a session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Live and reachable through lookup.
    Active,
    /// Terminated for inactivity.
    Expired,
    /// Removed to make room in the live cache.
    Evicted,
    /// Terminated by the application.
    Invalidated,
    /// Never seen, or looked up without ever being live.
    NotFound,
}

impl SessionStatus {
    /// Whether this status ends a session's life.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Expired | Self::Evicted | Self::Invalidated)
    }
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingRecord {
    pub id: String,
    pub status: SessionStatus,
    pub last_transition: DateTime<Utc>,
}

struct LedgerInner {
    records: LruCache<String, AccountingRecord>,
    peak: usize,
}

/// Bounded, recency-pruned record of session states.
pub struct AccountingLedger {
    inner: Mutex<LedgerInner>,
    multiplier: usize,
}

impl AccountingLedger {
    /// Create a ledger sized at `multiplier` times the peak live count.
    pub fn new(multiplier: usize) -> Self {
        let multiplier = multiplier.max(1);
        Self {
            inner: Mutex::new(LedgerInner {
                records: LruCache::new(capacity_for(multiplier, 1)),
                peak: 0,
            }),
            multiplier,
        }
    }

    /// Record a state transition for an identifier.
    ///
    /// An `Active` → `Active` update just refreshes recency and timestamp.
    pub fn update(&self, id: &str, status: SessionStatus) {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        if let Some(record) = inner.records.get_mut(id) {
            record.status = status;
            record.last_transition = now;
            return;
        }
        inner.records.put(
            id.to_string(),
            AccountingRecord {
                id: id.to_string(),
                status,
                last_transition: now,
            },
        );
    }

    /// Record a freshly generated identifier as `Active`.
    ///
    /// Returns `false`, changing nothing, if the ledger already remembers
    /// the identifier in any state.
    pub fn claim(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.records.contains(id) {
            return false;
        }
        inner.records.put(
            id.to_string(),
            AccountingRecord {
                id: id.to_string(),
                status: SessionStatus::Active,
                last_transition: Utc::now(),
            },
        );
        true
    }

    /// Note a failed lookup.
    ///
    /// A known identifier keeps its history; an unknown one is recorded as
    /// `NotFound`.
    pub fn record_miss(&self, id: &str) {
        let mut inner = self.inner.lock();
        if inner.records.peek(id).is_some() {
            return;
        }
        inner.records.put(
            id.to_string(),
            AccountingRecord {
                id: id.to_string(),
                status: SessionStatus::NotFound,
                last_transition: Utc::now(),
            },
        );
    }

    /// Last known status, or `NotFound` if the ledger has no record.
    pub fn status(&self, id: &str) -> SessionStatus {
        self.inner
            .lock()
            .records
            .peek(id)
            .map(|r| r.status)
            .unwrap_or(SessionStatus::NotFound)
    }

    /// Time of the last recorded transition, if any.
    pub fn last_access(&self, id: &str) -> Option<DateTime<Utc>> {
        self.inner.lock().records.peek(id).map(|r| r.last_transition)
    }

    /// Full record for an identifier, without touching recency.
    pub fn record(&self, id: &str) -> Option<AccountingRecord> {
        self.inner.lock().records.peek(id).cloned()
    }

    /// Whether the ledger remembers an identifier.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().records.contains(id)
    }

    /// Feed the current live count; grows capacity when a new peak is seen.
    pub fn observe_live(&self, live: usize) {
        let mut inner = self.inner.lock();
        if live > inner.peak {
            inner.peak = live;
            let capacity = capacity_for(self.multiplier, live);
            if capacity > inner.records.cap() {
                inner.records.resize(capacity);
            }
        }
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Current capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().records.cap().get()
    }

    /// Highest live count observed.
    pub fn peak(&self) -> usize {
        self.inner.lock().peak
    }
}

fn capacity_for(multiplier: usize, peak: usize) -> NonZeroUsize {
    NonZeroUsize::new(multiplier.saturating_mul(peak.max(1))).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_id_is_not_found() {
        let ledger = AccountingLedger::new(5);
        assert_eq!(ledger.status("nope"), SessionStatus::NotFound);
        assert!(ledger.last_access("nope").is_none());
    }

    #[test]
    fn test_update_and_status() {
        let ledger = AccountingLedger::new(5);
        ledger.update("s1", SessionStatus::Active);
        assert_eq!(ledger.status("s1"), SessionStatus::Active);

        ledger.update("s1", SessionStatus::Expired);
        assert_eq!(ledger.status("s1"), SessionStatus::Expired);
        assert!(ledger.last_access("s1").is_some());
    }

    #[test]
    fn test_active_refresh_moves_timestamp_forward() {
        let ledger = AccountingLedger::new(5);
        ledger.update("s1", SessionStatus::Active);
        let first = ledger.last_access("s1").unwrap();
        ledger.update("s1", SessionStatus::Active);
        let second = ledger.last_access("s1").unwrap();
        assert!(second >= first);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_claim_only_unknown_ids() {
        let ledger = AccountingLedger::new(5);
        assert!(ledger.claim("s1"));
        assert_eq!(ledger.status("s1"), SessionStatus::Active);
        assert!(!ledger.claim("s1"));

        ledger.update("s2", SessionStatus::Invalidated);
        assert!(!ledger.claim("s2"));
        assert_eq!(ledger.status("s2"), SessionStatus::Invalidated);
    }

    #[test]
    fn test_miss_keeps_terminal_history() {
        let ledger = AccountingLedger::new(5);
        ledger.update("s1", SessionStatus::Evicted);
        ledger.record_miss("s1");
        assert_eq!(ledger.status("s1"), SessionStatus::Evicted);

        ledger.record_miss("s2");
        assert_eq!(ledger.status("s2"), SessionStatus::NotFound);
        assert!(ledger.contains("s2"));
    }

    #[test]
    fn test_capacity_follows_peak() {
        let ledger = AccountingLedger::new(2);
        assert_eq!(ledger.capacity(), 2);

        ledger.observe_live(3);
        assert_eq!(ledger.capacity(), 6);
        assert_eq!(ledger.peak(), 3);

        // Never shrinks
        ledger.observe_live(1);
        assert_eq!(ledger.capacity(), 6);
    }

    #[test]
    fn test_prunes_least_recent() {
        let ledger = AccountingLedger::new(1);
        ledger.observe_live(2);
        ledger.update("a", SessionStatus::Invalidated);
        ledger.update("b", SessionStatus::Invalidated);
        // Refresh "a" so "b" is the oldest
        ledger.update("a", SessionStatus::Invalidated);
        ledger.update("c", SessionStatus::Active);

        assert!(ledger.contains("a"));
        assert!(!ledger.contains("b"));
        assert!(ledger.contains("c"));
    }
}
