//! Keyed debounce queue
//!
//! Collapses a burst of requests for the same key into one execution:
//!
//! - each enqueue replaces the key's job with the newest one and registers
//!   the caller as a waiter
//! - each enqueue restarts the key's debounce timer
//! - when a key's timer fires, its last job runs once and every waiter
//!   registered in the window receives the same result
//!
//! Each key holds at most one live debounce timer and runs its job on its
//! own task, so a slow, failing or panicking job only affects its own
//! waiters.

use futures::future::BoxFuture;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::{EngineError, Result};

/// Deferred unit of work registered for a key
pub type BatchJob<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;

/// Work waiting for its key's timer
struct PendingBatch<T> {
    /// Most recently registered job; earlier ones are discarded
    job: BatchJob<T>,
    /// Channels to send the shared result back
    waiters: Vec<oneshot::Sender<Result<T>>>,
    /// Identifies the enqueue whose timer may fire this batch
    generation: u64,
    /// Debounce timer of that enqueue; aborted when a later enqueue restarts it
    timer: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct BatchStats {
    enqueued: AtomicU64,
    coalesced: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of batch queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStatsSnapshot {
    /// Total enqueue calls
    pub enqueued: u64,
    /// Enqueues that joined an already pending key
    pub coalesced: u64,
    /// Jobs actually run
    pub executed: u64,
    /// Jobs that returned an error
    pub failed: u64,
}

struct Inner<K, T> {
    pending: Mutex<HashMap<K, PendingBatch<T>>>,
    debounce: Duration,
    generation: AtomicU64,
    stats: BatchStats,
}

/// Per-key debounce queue; cheap to clone
pub struct BatchQueue<K, T> {
    inner: Arc<Inner<K, T>>,
}

impl<K, T> Clone for BatchQueue<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, T> BatchQueue<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    pub fn new(debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                debounce,
                generation: AtomicU64::new(0),
                stats: BatchStats::default(),
            }),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    /// Register `job` for `key` and wait for the key's batch to complete.
    pub async fn enqueue(&self, key: K, job: BatchJob<T>) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.stats.enqueued.fetch_add(1, Ordering::Relaxed);

        {
            let mut pending = self.inner.pending.lock().await;
            let timer = self.spawn_timer(key.clone(), generation);
            match pending.entry(key) {
                Entry::Occupied(mut entry) => {
                    let batch = entry.get_mut();
                    batch.timer.abort();
                    batch.timer = timer;
                    batch.job = job;
                    batch.waiters.push(response_tx);
                    batch.generation = generation;
                    self.inner.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        key = ?entry.key(),
                        waiters = entry.get().waiters.len(),
                        "Joined pending batch"
                    );
                }
                Entry::Vacant(entry) => {
                    entry.insert(PendingBatch {
                        job,
                        waiters: vec![response_tx],
                        generation,
                        timer,
                    });
                }
            }
        }

        match response_rx.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::BatchDropped(
                "batch ended without a result".into(),
            )),
        }
    }

    fn spawn_timer(&self, key: K, generation: u64) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            Inner::fire(inner, key, generation).await;
        })
    }

    /// Number of keys currently waiting for their timer
    pub async fn pending_keys(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    pub fn stats(&self) -> BatchStatsSnapshot {
        let stats = &self.inner.stats;
        BatchStatsSnapshot {
            enqueued: stats.enqueued.load(Ordering::Relaxed),
            coalesced: stats.coalesced.load(Ordering::Relaxed),
            executed: stats.executed.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
        }
    }
}

impl<K, T> Inner<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    /// Run the batch for `key` if no later enqueue restarted its timer
    async fn fire(inner: Arc<Self>, key: K, generation: u64) {
        let batch = {
            let mut pending = inner.pending.lock().await;
            match pending.get(&key) {
                Some(batch) if batch.generation == generation => pending.remove(&key),
                _ => None,
            }
        };
        let Some(batch) = batch else {
            return;
        };

        let waiter_count = batch.waiters.len();
        debug!(key = ?key, waiters = waiter_count, "Running coalesced batch");

        inner.stats.executed.fetch_add(1, Ordering::Relaxed);
        // Run on its own task so a panicking job still answers its waiters
        let result = match tokio::spawn((batch.job)()).await {
            Ok(result) => result,
            Err(e) => Err(EngineError::Internal(format!("batch job aborted: {}", e))),
        };
        if let Err(e) = &result {
            inner.stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(key = ?key, waiters = waiter_count, "Coalesced batch failed: {}", e);
        }

        for waiter in batch.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}
