//! Coalesced team achievement checks
//!
//! CRUD services fire a trigger after every write. Checks are keyed by
//! `(workspace, trigger kind)` and pass through two layers:
//!
//! 1. the dedup cache drops a trigger if the same key was admitted within
//!    the window
//! 2. the batch queue debounces what remains, so a burst costs one
//!    evaluation whose result every caller shares

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

use super::batch::{BatchJob, BatchQueue, BatchStatsSnapshot};
use super::dedup::{spawn_cleanup_task, DedupCache, DedupCacheConfig, DedupStatsSnapshot};
use crate::context::ContextSnapshot;
use crate::services::{TeamAchievementService, TeamCheckResult};
use crate::trigger::TriggerKind;
use crate::types::Result;

/// Key shared by the dedup cache and the batch queue
pub type TeamCheckKey = (String, TriggerKind);

/// Snapshot of team coalescer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeamCoalescerStats {
    pub dedup: DedupStatsSnapshot,
    pub batch: BatchStatsSnapshot,
    /// Catalog evaluations run by the underlying service
    pub evaluations: u64,
}

pub struct TeamAchievementCoalescer {
    service: Arc<TeamAchievementService>,
    dedup: Arc<DedupCache<TeamCheckKey>>,
    queue: BatchQueue<TeamCheckKey, TeamCheckResult>,
}

impl TeamAchievementCoalescer {
    pub fn new(
        service: Arc<TeamAchievementService>,
        debounce: Duration,
        dedup: DedupCacheConfig,
    ) -> Self {
        Self {
            service,
            dedup: Arc::new(DedupCache::new(dedup)),
            queue: BatchQueue::new(debounce),
        }
    }

    /// Debounced check. Every caller inside the window gets the result of
    /// the single evaluation run against the latest snapshot.
    pub async fn check_batched(
        &self,
        workspace_id: &str,
        user_id: &str,
        snapshot: ContextSnapshot,
        trigger: TriggerKind,
    ) -> Result<TeamCheckResult> {
        let service = Arc::clone(&self.service);
        let ws = workspace_id.to_string();
        let user = user_id.to_string();
        let job: BatchJob<TeamCheckResult> = Box::new(move || {
            Box::pin(async move {
                service
                    .check_team_achievements(&ws, &user, &snapshot, Some(trigger))
                    .await
            })
        });

        self.queue
            .enqueue((workspace_id.to_string(), trigger), job)
            .await
    }

    /// Dedup-gated, debounced check.
    ///
    /// Returns `Ok(None)` when the key was already checked within the
    /// window. A failed evaluation clears the key so the next trigger
    /// retries.
    pub async fn check_cached(
        &self,
        workspace_id: &str,
        user_id: &str,
        snapshot: ContextSnapshot,
        trigger: TriggerKind,
    ) -> Result<Option<TeamCheckResult>> {
        let key = (workspace_id.to_string(), trigger);
        if !self.dedup.try_admit(key.clone()) {
            return Ok(None);
        }

        match self
            .check_batched(workspace_id, user_id, snapshot, trigger)
            .await
        {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                self.dedup.invalidate(&key);
                Err(e)
            }
        }
    }

    /// Fire-and-report trigger: failures are logged and reported as `None`
    pub async fn on_trigger(
        &self,
        workspace_id: &str,
        user_id: &str,
        trigger: TriggerKind,
        value: f64,
    ) -> Option<TeamCheckResult> {
        match self
            .check_cached(workspace_id, user_id, trigger.snapshot(value), trigger)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    workspace_id,
                    user_id,
                    trigger = %trigger,
                    transient = e.is_transient(),
                    "Team achievement check failed: {}",
                    e
                );
                None
            }
        }
    }

    pub async fn on_member_added(
        &self,
        workspace_id: &str,
        user_id: &str,
        member_count: u64,
    ) -> Option<TeamCheckResult> {
        self.on_trigger(workspace_id, user_id, TriggerKind::MemberAdded, member_count as f64)
            .await
    }

    pub async fn on_task_completed(
        &self,
        workspace_id: &str,
        user_id: &str,
        completed_tasks: u64,
    ) -> Option<TeamCheckResult> {
        self.on_trigger(workspace_id, user_id, TriggerKind::TaskCompleted, completed_tasks as f64)
            .await
    }

    pub async fn on_meeting_logged(
        &self,
        workspace_id: &str,
        user_id: &str,
        meetings_logged: u64,
    ) -> Option<TeamCheckResult> {
        self.on_trigger(workspace_id, user_id, TriggerKind::MeetingLogged, meetings_logged as f64)
            .await
    }

    pub async fn on_contact_added(
        &self,
        workspace_id: &str,
        user_id: &str,
        contacts_added: u64,
    ) -> Option<TeamCheckResult> {
        self.on_trigger(workspace_id, user_id, TriggerKind::ContactAdded, contacts_added as f64)
            .await
    }

    pub async fn on_revenue_logged(
        &self,
        workspace_id: &str,
        user_id: &str,
        total_gmv: f64,
    ) -> Option<TeamCheckResult> {
        self.on_trigger(workspace_id, user_id, TriggerKind::RevenueLogged, total_gmv)
            .await
    }

    pub async fn on_document_created(
        &self,
        workspace_id: &str,
        user_id: &str,
        documents_created: u64,
    ) -> Option<TeamCheckResult> {
        self.on_trigger(
            workspace_id,
            user_id,
            TriggerKind::DocumentCreated,
            documents_created as f64,
        )
        .await
    }

    /// Start the periodic sweep of expired dedup entries
    pub fn spawn_cleanup(&self) -> JoinHandle<()> {
        spawn_cleanup_task(Arc::clone(&self.dedup))
    }

    pub fn stats(&self) -> TeamCoalescerStats {
        TeamCoalescerStats {
            dedup: self.dedup.stats(),
            batch: self.queue.stats(),
            evaluations: self.service.evaluation_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::events::EventBus;
    use crate::gateway::InMemoryGateway;

    fn coalescer() -> (Arc<InMemoryGateway>, Arc<TeamAchievementCoalescer>) {
        let gateway = Arc::new(InMemoryGateway::new());
        let service = Arc::new(TeamAchievementService::new(
            gateway.clone(),
            Arc::new(Catalog::team_defaults()),
            EventBus::default(),
        ));
        let coalescer = TeamAchievementCoalescer::new(
            service,
            Duration::from_secs(1),
            DedupCacheConfig::default(),
        );
        (gateway, Arc::new(coalescer))
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_trigger_in_window_dropped() {
        let (gateway, coalescer) = coalescer();

        let first = coalescer.on_task_completed("w1", "u1", 1).await;
        let second = coalescer.on_task_completed("w1", "u2", 2).await;

        assert_eq!(first.unwrap().new_achievements[0].achievement_id, "team-first-task");
        assert!(second.is_none());
        assert_eq!(coalescer.stats().evaluations, 1);
        assert_eq!(gateway.workspace("w1").unwrap().team_xp, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_kinds_dedup_separately() {
        let (_, coalescer) = coalescer();

        let tasks = coalescer.on_task_completed("w1", "u1", 1).await;
        let contacts = coalescer.on_contact_added("w1", "u1", 1).await;

        assert!(tasks.is_some());
        assert_eq!(contacts.unwrap().total_xp, 100);
        assert_eq!(coalescer.stats().evaluations, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batched_callers_share_result() {
        let (gateway, coalescer) = coalescer();

        let handles: Vec<_> = (1..=5)
            .map(|n| {
                let coalescer = Arc::clone(&coalescer);
                tokio::spawn(async move {
                    coalescer
                        .check_batched(
                            "w1",
                            "u1",
                            TriggerKind::MemberAdded.snapshot(n as f64),
                            TriggerKind::MemberAdded,
                        )
                        .await
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert!(results.iter().all(|r| r == &results[0]));
        assert_eq!(coalescer.stats().evaluations, 1);
        assert_eq!(coalescer.stats().batch.executed, 1);
        // Evaluated against the latest snapshot (memberCount = 5)
        assert_eq!(results[0].new_achievements[0].achievement_id, "team-of-5");
        assert_eq!(gateway.workspace("w1").unwrap().unlocked_achievements.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readmitted_after_window() {
        let (_, coalescer) = coalescer();

        assert!(coalescer.on_meeting_logged("w1", "u1", 1).await.is_some());
        assert!(coalescer.on_meeting_logged("w1", "u1", 2).await.is_none());

        tokio::time::advance(Duration::from_secs(61)).await;
        let again = coalescer.on_meeting_logged("w1", "u1", 50).await.unwrap();
        assert_eq!(again.new_achievements[0].achievement_id, "team-meetings-50");
    }
}
