//! Per-user XP batching
//!
//! Small XP grants that arrive in bursts (bulk task completion, imports) are
//! merged into one pending entry per user and applied with a single write
//! when the flush timer fires. A failed apply puts the user's entry back so
//! the grant is retried on the next cycle instead of being lost.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::context::ContextSnapshot;
use crate::services::{AwardResult, UserProgressService};
use crate::state::UserGamificationState;
use crate::types::Result;

/// Outcome of an XP award request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AwardOutcome {
    /// Applied and persisted right away
    Applied(AwardResult),
    /// Merged into the user's pending batch
    #[serde(rename_all = "camelCase")]
    Queued { pending_xp: u64 },
}

impl AwardOutcome {
    pub fn applied(&self) -> Option<&AwardResult> {
        match self {
            AwardOutcome::Applied(result) => Some(result),
            AwardOutcome::Queued { .. } => None,
        }
    }
}

/// Grants merged for one user since the last flush
#[derive(Debug, Clone, Default)]
struct PendingAward {
    total_pending_xp: u64,
    reasons: Vec<String>,
    context: ContextSnapshot,
}

impl PendingAward {
    fn add(&mut self, amount: u64, reason: Option<&str>, context: &ContextSnapshot) {
        self.total_pending_xp = self.total_pending_xp.saturating_add(amount);
        if let Some(reason) = reason {
            self.reasons.push(reason.to_string());
        }
        self.context.merge(context);
    }

    /// Fold a newer entry into this older one
    fn absorb(&mut self, newer: PendingAward) {
        self.total_pending_xp = self.total_pending_xp.saturating_add(newer.total_pending_xp);
        self.reasons.extend(newer.reasons);
        self.context.merge(&newer.context);
    }
}

/// Result of draining the pending queue once
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    /// Per-user results for entries applied in this flush
    pub applied: BTreeMap<String, AwardResult>,
    /// Users whose entry was put back for the next cycle
    pub requeued: Vec<String>,
}

impl FlushReport {
    pub fn xp_applied(&self) -> u64 {
        self.applied.values().map(|r| r.xp_awarded).sum()
    }
}

#[derive(Debug, Default)]
struct XpStats {
    queued: AtomicU64,
    immediate: AtomicU64,
    flushes: AtomicU64,
    writes: AtomicU64,
    requeued: AtomicU64,
}

/// Snapshot of XP coalescer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XpStatsSnapshot {
    pub queued: u64,
    pub immediate: u64,
    pub flushes: u64,
    pub writes: u64,
    pub requeued: u64,
}

struct XpInner {
    progress: Arc<UserProgressService>,
    pending: Mutex<HashMap<String, PendingAward>>,
    flush_delay: Duration,
    flush_scheduled: AtomicBool,
    flush_lock: Mutex<()>,
    stats: XpStats,
}

/// Merges queued XP grants per user; cheap to clone
#[derive(Clone)]
pub struct XpAwardCoalescer {
    inner: Arc<XpInner>,
}

impl XpAwardCoalescer {
    pub fn new(progress: Arc<UserProgressService>, flush_delay: Duration) -> Self {
        Self {
            inner: Arc::new(XpInner {
                progress,
                pending: Mutex::new(HashMap::new()),
                flush_delay,
                flush_scheduled: AtomicBool::new(false),
                flush_lock: Mutex::new(()),
                stats: XpStats::default(),
            }),
        }
    }

    /// Award XP to a user.
    ///
    /// With `immediate` the award is applied on top of `current` and
    /// persisted before returning. Otherwise it joins the user's pending
    /// batch, which is applied against the stored state at flush time.
    pub async fn award(
        &self,
        user_id: &str,
        current: &UserGamificationState,
        amount: u64,
        snapshot: &ContextSnapshot,
        reason: Option<&str>,
        immediate: bool,
    ) -> Result<AwardOutcome> {
        if immediate {
            self.inner.stats.immediate.fetch_add(1, Ordering::Relaxed);
            let result = self
                .inner
                .progress
                .award_xp(user_id, current, amount, snapshot, reason)
                .await?;
            return Ok(AwardOutcome::Applied(result));
        }

        let pending_xp = {
            let mut pending = self.inner.pending.lock().await;
            let entry = pending.entry(user_id.to_string()).or_default();
            entry.add(amount, reason, snapshot);
            entry.total_pending_xp
        };
        self.inner.stats.queued.fetch_add(1, Ordering::Relaxed);
        debug!(user_id, amount, pending_xp, "XP award queued");

        self.schedule_flush();
        Ok(AwardOutcome::Queued { pending_xp })
    }

    /// XP currently waiting for a flush for `user_id`
    pub async fn pending_xp(&self, user_id: &str) -> u64 {
        self.inner
            .pending
            .lock()
            .await
            .get(user_id)
            .map(|p| p.total_pending_xp)
            .unwrap_or(0)
    }

    /// Number of users with a pending entry
    pub async fn pending_users(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Schedule one flush after the delay unless one is already scheduled
    fn schedule_flush(&self) {
        if self
            .inner
            .flush_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.inner.flush_delay).await;
            this.flush().await;
        });
    }

    /// Drain the queue and apply every user's merged award once.
    pub async fn flush(&self) -> FlushReport {
        let _guard = self.inner.flush_lock.lock().await;
        // Awards arriving from here on schedule a fresh flush
        self.inner.flush_scheduled.store(false, Ordering::Release);

        let batch = std::mem::take(&mut *self.inner.pending.lock().await);
        if batch.is_empty() {
            return FlushReport::default();
        }
        self.inner.stats.flushes.fetch_add(1, Ordering::Relaxed);

        let users = batch.len();
        let progress = &self.inner.progress;
        let outcomes = join_all(batch.into_iter().map(|(user_id, award)| async move {
            let result = progress
                .award_from_store(&user_id, award.total_pending_xp, &award.context, &award.reasons)
                .await;
            (user_id, award, result)
        }))
        .await;

        let mut report = FlushReport::default();
        let mut failed = Vec::new();
        for (user_id, award, result) in outcomes {
            match result {
                Ok(result) => {
                    self.inner.stats.writes.fetch_add(1, Ordering::Relaxed);
                    report.applied.insert(user_id, result);
                }
                Err(e) => {
                    warn!(
                        user_id = %user_id,
                        pending_xp = award.total_pending_xp,
                        "XP flush failed, re-queuing: {}",
                        e
                    );
                    failed.push((user_id, award));
                }
            }
        }

        if !failed.is_empty() {
            let mut pending = self.inner.pending.lock().await;
            for (user_id, mut award) in failed {
                if let Some(newer) = pending.remove(&user_id) {
                    award.absorb(newer);
                }
                pending.insert(user_id.clone(), award);
                report.requeued.push(user_id);
            }
            drop(pending);
            self.inner
                .stats
                .requeued
                .fetch_add(report.requeued.len() as u64, Ordering::Relaxed);
            self.schedule_flush();
        }

        info!(
            users,
            applied = report.applied.len(),
            requeued = report.requeued.len(),
            xp = report.xp_applied(),
            "XP batch flushed"
        );
        report
    }

    pub fn stats(&self) -> XpStatsSnapshot {
        let stats = &self.inner.stats;
        XpStatsSnapshot {
            queued: stats.queued.load(Ordering::Relaxed),
            immediate: stats.immediate.load(Ordering::Relaxed),
            flushes: stats.flushes.load(Ordering::Relaxed),
            writes: stats.writes.load(Ordering::Relaxed),
            requeued: stats.requeued.load(Ordering::Relaxed),
        }
    }
}
