//! Per-entity trailing-edge debouncing of remote writes.
//!
//! Rapid edits to the same entity are coalesced: each `schedule` call for a
//! key replaces the previous one, and only the last payload is written once
//! the delay has elapsed without another schedule. The future returned for a
//! replaced schedule never completes.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use taskgrid_core::TaskgridResult;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Delay applied when the caller has no configured value.
pub const DEFAULT_WRITE_DELAY: Duration = Duration::from_millis(300);

struct PendingTimer {
    generation: u64,
    timer: JoinHandle<()>,
}

type Registry<K> = Arc<Mutex<HashMap<K, PendingTimer>>>;

fn lock_registry<K>(
    registry: &Mutex<HashMap<K, PendingTimer>>,
) -> MutexGuard<'_, HashMap<K, PendingTimer>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of at most one outstanding scheduled write per key.
pub struct WriteDebouncer<K> {
    registry: Registry<K>,
    generation: AtomicU64,
    delay: Duration,
}

impl<K> fmt::Debug for WriteDebouncer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteDebouncer")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl<K> Default for WriteDebouncer<K> {
    fn default() -> Self {
        Self::with_delay(DEFAULT_WRITE_DELAY)
    }
}

impl<K> WriteDebouncer<K> {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            delay,
        }
    }

    /// Configured default delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl<K> WriteDebouncer<K>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `write_fn(key, payload)` to run after `delay`.
    ///
    /// Any write still waiting for `key` is cancelled; its future stays
    /// pending forever. A write whose timer already fired is never
    /// interrupted. Must be called from within a tokio runtime.
    pub fn schedule<P, T, F, Fut>(
        &self,
        key: K,
        payload: P,
        delay: Duration,
        write_fn: F,
    ) -> ScheduledWrite<T>
    where
        P: Send + 'static,
        T: Send + 'static,
        F: FnOnce(K, P) -> Fut + Send + 'static,
        Fut: Future<Output = TaskgridResult<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.registry);
        let timer_key = key.clone();

        let mut pending = lock_registry(&self.registry);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut pending = lock_registry(&registry);
                // Replaced between wake-up and lock.
                if pending.get(&timer_key).map(|entry| entry.generation) != Some(generation) {
                    return;
                }
                pending.remove(&timer_key);
            }
            trace!(key = ?timer_key, "Debounced write firing");
            let outcome = write_fn(timer_key, payload).await;
            let _ = tx.send(outcome);
        });
        let replaced = match pending.insert(key.clone(), PendingTimer { generation, timer }) {
            Some(previous) => {
                debug!(key = ?key, "Replacing scheduled write");
                previous.timer.abort();
                true
            }
            None => false,
        };

        ScheduledWrite {
            receiver: rx,
            superseded: false,
            replaced,
        }
    }

    /// Schedule with the configured default delay.
    pub fn schedule_default<P, T, F, Fut>(
        &self,
        key: K,
        payload: P,
        write_fn: F,
    ) -> ScheduledWrite<T>
    where
        P: Send + 'static,
        T: Send + 'static,
        F: FnOnce(K, P) -> Fut + Send + 'static,
        Fut: Future<Output = TaskgridResult<T>> + Send + 'static,
    {
        self.schedule(key, payload, self.delay, write_fn)
    }

    /// Cancel the write waiting for `key`, if any. Returns whether one was
    /// cancelled.
    pub fn cancel(&self, key: &K) -> bool {
        match lock_registry(&self.registry).remove(key) {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a write for `key` is waiting on its timer.
    pub fn is_scheduled(&self, key: &K) -> bool {
        lock_registry(&self.registry).contains_key(key)
    }

    /// Number of writes waiting on their timer.
    pub fn pending_count(&self) -> usize {
        lock_registry(&self.registry).len()
    }
}

/// Completion of one scheduled write.
///
/// Resolves with the write's outcome, or never resolves when the schedule
/// was replaced or cancelled before its timer fired.
#[must_use = "a scheduled write reports its outcome only when awaited"]
#[derive(Debug)]
pub struct ScheduledWrite<T> {
    receiver: oneshot::Receiver<TaskgridResult<T>>,
    superseded: bool,
    replaced: bool,
}

impl<T> ScheduledWrite<T> {
    /// Whether scheduling this write cancelled one still waiting on its
    /// timer. A write whose timer had already fired is not replaced and
    /// still settles.
    pub fn replaced_waiting(&self) -> bool {
        self.replaced
    }
}

impl<T> Future for ScheduledWrite<T> {
    type Output = TaskgridResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.superseded {
            return Poll::Pending;
        }
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => {
                self.superseded = true;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
