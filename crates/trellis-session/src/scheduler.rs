//! Inactivity expiration.
//!
//! Two strategies sit behind [`ExpirationScheduler`]:
//! - [`TimerScheduler`] keeps one Tokio task per live session and replaces it
//!   on every access. Tight precision, one task per session.
//! - [`SweepScheduler`] keeps a deadline-ordered index and one background
//!   loop. Precision is bounded by the sweep interval, task count is fixed.
//!
//! Both run on the Tokio runtime, never on the caller's thread, and both
//! hand due identifiers to an [`ExpirySink`] which re-checks the deadline
//! before terminating anything.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace};

use crate::config::ExpirationStrategy;

/// Receiver of due expirations.
pub trait ExpirySink: Send + Sync {
    /// The deadline recorded for `id` has passed.
    fn expire(&self, id: &str);
}

/// Schedules expiration for live sessions.
pub trait ExpirationScheduler: Send + Sync {
    /// Schedule (or reschedule) expiration of `id` at `deadline`.
    fn schedule(&self, id: &str, deadline: Instant);

    /// Drop any pending expiration for `id`.
    fn cancel(&self, id: &str);

    /// Number of pending expirations.
    fn pending(&self) -> usize;

    /// Cancel everything and stop background work.
    fn shutdown(&self);
}

/// Build the scheduler for a strategy on the given runtime.
pub fn build_scheduler(
    strategy: ExpirationStrategy,
    runtime: Handle,
    sink: Weak<dyn ExpirySink>,
) -> Box<dyn ExpirationScheduler> {
    match strategy {
        ExpirationStrategy::TimerPerSession => Box::new(TimerScheduler::new(runtime, sink)),
        ExpirationStrategy::PeriodicSweep { interval } => {
            Box::new(SweepScheduler::new(runtime, interval, sink))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timer per session
// ─────────────────────────────────────────────────────────────────────────────

struct Timer {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct TimerTable {
    timers: HashMap<String, Timer>,
    next_generation: u64,
}

/// One outstanding timer task per session.
pub struct TimerScheduler {
    runtime: Handle,
    sink: Weak<dyn ExpirySink>,
    table: Arc<Mutex<TimerTable>>,
}

impl TimerScheduler {
    pub fn new(runtime: Handle, sink: Weak<dyn ExpirySink>) -> Self {
        Self {
            runtime,
            sink,
            table: Arc::new(Mutex::new(TimerTable::default())),
        }
    }
}

impl ExpirationScheduler for TimerScheduler {
    fn schedule(&self, id: &str, deadline: Instant) {
        // Spawn under the table lock so the task cannot finish and clean up
        // before its own entry exists.
        let mut table = self.table.lock();
        table.next_generation += 1;
        let generation = table.next_generation;

        let sink = self.sink.clone();
        let owner = Arc::downgrade(&self.table);
        let key = id.to_string();
        let task = self.runtime.spawn(async move {
            sleep_until(deadline).await;
            if let Some(sink) = sink.upgrade() {
                sink.expire(&key);
            }
            if let Some(table) = owner.upgrade() {
                let mut table = table.lock();
                if table
                    .timers
                    .get(&key)
                    .is_some_and(|t| t.generation == generation)
                {
                    table.timers.remove(&key);
                }
            }
        });

        if let Some(previous) = table
            .timers
            .insert(id.to_string(), Timer { generation, task })
        {
            previous.task.abort();
        }
        trace!(session_id = %id, "Expiration timer scheduled");
    }

    fn cancel(&self, id: &str) {
        if let Some(timer) = self.table.lock().timers.remove(id) {
            timer.task.abort();
            trace!(session_id = %id, "Expiration timer cancelled");
        }
    }

    fn pending(&self) -> usize {
        self.table.lock().timers.len()
    }

    fn shutdown(&self) {
        let drained: Vec<Timer> = self.table.lock().timers.drain().map(|(_, t)| t).collect();
        for timer in drained {
            timer.task.abort();
        }
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Periodic sweep
// ─────────────────────────────────────────────────────────────────────────────

/// Deadline-ordered index of pending expirations.
#[derive(Default)]
struct SweepIndex {
    by_deadline: BTreeSet<(Instant, String)>,
    deadlines: HashMap<String, Instant>,
}

impl SweepIndex {
    fn insert(&mut self, id: &str, deadline: Instant) -> bool {
        self.remove(id);
        self.by_deadline.insert((deadline, id.to_string()));
        self.deadlines.insert(id.to_string(), deadline);
        self.by_deadline
            .first()
            .is_some_and(|(first, first_id)| *first == deadline && first_id == id)
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.deadlines.remove(id) {
            Some(deadline) => self.by_deadline.remove(&(deadline, id.to_string())),
            None => false,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.first().map(|(deadline, _)| *deadline)
    }

    fn drain_due(&mut self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        while let Some((deadline, _)) = self.by_deadline.first() {
            if *deadline > now {
                break;
            }
            if let Some((_, id)) = self.by_deadline.pop_first() {
                self.deadlines.remove(&id);
                due.push(id);
            }
        }
        due
    }

    fn clear(&mut self) {
        self.by_deadline.clear();
        self.deadlines.clear();
    }
}

/// A single background loop over a deadline-ordered index.
pub struct SweepScheduler {
    index: Arc<Mutex<SweepIndex>>,
    wake: Arc<Notify>,
    worker: JoinHandle<()>,
}

impl SweepScheduler {
    /// Start the sweep loop. Sweeps are spaced at least `interval` apart.
    pub fn new(runtime: Handle, interval: Duration, sink: Weak<dyn ExpirySink>) -> Self {
        let index = Arc::new(Mutex::new(SweepIndex::default()));
        let wake = Arc::new(Notify::new());
        let worker = runtime.spawn(sweep_loop(
            Arc::clone(&index),
            Arc::clone(&wake),
            interval,
            sink,
        ));
        Self {
            index,
            wake,
            worker,
        }
    }
}

async fn sweep_loop(
    index: Arc<Mutex<SweepIndex>>,
    wake: Arc<Notify>,
    interval: Duration,
    sink: Weak<dyn ExpirySink>,
) {
    let mut last_sweep = Instant::now();
    loop {
        let next = index.lock().next_deadline();
        match next {
            None => {
                // Nothing pending: sleep until the next insertion
                wake.notified().await;
                continue;
            }
            Some(deadline) => {
                let wake_at = deadline.max(last_sweep + interval);
                tokio::select! {
                    _ = sleep_until(wake_at) => {}
                    _ = wake.notified() => continue,
                }
            }
        }

        let now = Instant::now();
        last_sweep = now;
        let due = index.lock().drain_due(now);
        if due.is_empty() {
            continue;
        }

        let Some(sink) = sink.upgrade() else {
            debug!("Session registry dropped, stopping expiration sweep");
            return;
        };
        trace!(count = due.len(), "Expiration sweep found due sessions");
        for id in &due {
            sink.expire(id);
        }
    }
}

impl ExpirationScheduler for SweepScheduler {
    fn schedule(&self, id: &str, deadline: Instant) {
        let is_first = self.index.lock().insert(id, deadline);
        if is_first {
            self.wake.notify_one();
        }
    }

    fn cancel(&self, id: &str) {
        self.index.lock().remove(id);
    }

    fn pending(&self) -> usize {
        self.index.lock().deadlines.len()
    }

    fn shutdown(&self) {
        self.index.lock().clear();
        self.worker.abort();
    }
}

impl Drop for SweepScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
