//! Workspace (team) achievements and team level
//!
//! All evaluation for a workspace runs under a per-workspace async lock, so
//! a coalesced check, a direct check and a recalculation can never append
//! the same achievement twice.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use crate::catalog::Catalog;
use crate::context::ContextSnapshot;
use crate::evaluator::evaluate;
use crate::events::{EventBus, GamificationEvent};
use crate::gateway::PersistenceGateway;
use crate::level::calculate_team_level;
use crate::state::{UnlockRecord, WorkspaceAchievementState, META_TRIGGER, META_XP_REWARD};
use crate::trigger::TriggerKind;
use crate::types::{EngineError, Result};

/// Outcome of a team level recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamLevelChange {
    pub leveled_up: bool,
    pub previous_level: u32,
    pub new_level: u32,
}

/// Outcome of a team achievement check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamCheckResult {
    pub new_achievements: Vec<UnlockRecord>,
    #[serde(rename = "totalXP")]
    pub total_xp: u64,
    pub team_level: u32,
    pub leveled_up: bool,
}

/// Evaluates team catalogs and persists unlocks and team level
pub struct TeamAchievementService {
    gateway: Arc<dyn PersistenceGateway>,
    catalog: Arc<Catalog>,
    events: EventBus,
    locks: DashMap<String, Arc<Mutex<()>>>,
    evaluations: AtomicU64,
}

impl TeamAchievementService {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        catalog: Arc<Catalog>,
        events: EventBus,
    ) -> Self {
        Self {
            gateway,
            catalog,
            events,
            locks: DashMap::new(),
            evaluations: AtomicU64::new(0),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Number of catalog evaluations run so far
    pub fn evaluation_count(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    async fn lock_workspace(&self, workspace_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(workspace_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Stored state, or the zero state for a workspace never written
    pub async fn load(&self, workspace_id: &str) -> Result<WorkspaceAchievementState> {
        Ok(self
            .gateway
            .get_workspace_state(workspace_id)
            .await?
            .unwrap_or_default())
    }

    /// Persist the zero state for a new workspace if nothing is stored yet
    pub async fn ensure_workspace(&self, workspace_id: &str) -> Result<WorkspaceAchievementState> {
        let _guard = self.lock_workspace(workspace_id).await;
        match self.gateway.get_workspace_state(workspace_id).await? {
            Some(state) => Ok(state),
            None => {
                let state = WorkspaceAchievementState::default();
                self.gateway.set_workspace_state(workspace_id, &state).await?;
                info!(workspace_id, "Workspace achievement state created");
                Ok(state)
            }
        }
    }

    /// Evaluate the team catalog against `snapshot` and persist new unlocks.
    ///
    /// Team XP is always re-derived from the stored records plus the ones
    /// appended here, so a retry after a failed write settles the total.
    pub async fn check_team_achievements(
        &self,
        workspace_id: &str,
        user_id: &str,
        snapshot: &ContextSnapshot,
        trigger: Option<TriggerKind>,
    ) -> Result<TeamCheckResult> {
        let _guard = self.lock_workspace(workspace_id).await;
        let state = self.load(workspace_id).await?;

        let (records, unlock_error) = self
            .unlock_new(workspace_id, user_id, &state, snapshot, trigger)
            .await;

        // Unlocks that did land still count towards team XP even if a later append failed
        let total_xp = self.reward_total(&state, &records);
        let mut team_level = state.team_level;
        let mut leveled_up = false;
        if total_xp != state.team_xp || team_level != calculate_team_level(total_xp) {
            if records.is_empty() {
                info!(
                    workspace_id,
                    stored = state.team_xp,
                    derived = total_xp,
                    "Team XP re-derived from unlock records"
                );
            }
            let change = self.apply_team_level(workspace_id, total_xp).await?;
            team_level = change.new_level;
            leveled_up = change.leveled_up;
        }

        if let Some(e) = unlock_error {
            return Err(e);
        }

        Ok(TeamCheckResult {
            new_achievements: records,
            total_xp,
            team_level,
            leveled_up,
        })
    }

    /// Full re-evaluation for backfill or repair.
    ///
    /// Evaluates the whole catalog against a complete snapshot and then
    /// re-derives team XP from the stored unlock records.
    pub async fn recalculate_all(
        &self,
        workspace_id: &str,
        user_id: &str,
        snapshot: &ContextSnapshot,
    ) -> Result<TeamCheckResult> {
        let _guard = self.lock_workspace(workspace_id).await;
        let state = self.load(workspace_id).await?;

        let (records, unlock_error) = self
            .unlock_new(workspace_id, user_id, &state, snapshot, None)
            .await;

        let total_xp = self.reward_total(&state, &records);
        if total_xp != state.team_xp {
            info!(
                workspace_id,
                stored = state.team_xp,
                derived = total_xp,
                "Team XP re-derived from unlock records"
            );
        }

        let change = self.apply_team_level(workspace_id, total_xp).await?;
        if let Some(e) = unlock_error {
            return Err(e);
        }

        Ok(TeamCheckResult {
            new_achievements: records,
            total_xp,
            team_level: change.new_level,
            leveled_up: change.leveled_up,
        })
    }

    /// Sum of rewards over the stored records and `appended`.
    ///
    /// Records without `xpReward` metadata fall back to the catalog reward.
    fn reward_total(&self, state: &WorkspaceAchievementState, appended: &[UnlockRecord]) -> u64 {
        state
            .unlocked_achievements
            .iter()
            .chain(appended)
            .map(|record| {
                record
                    .xp_reward()
                    .or_else(|| self.catalog.get(&record.achievement_id).map(|d| d.xp_reward))
                    .unwrap_or(0)
            })
            .sum()
    }

    /// Persist `new_total_xp` and the team level derived from it.
    pub async fn update_team_level(
        &self,
        workspace_id: &str,
        new_total_xp: u64,
    ) -> Result<TeamLevelChange> {
        let _guard = self.lock_workspace(workspace_id).await;
        self.apply_team_level(workspace_id, new_total_xp).await
    }

    /// Caller must hold the workspace lock
    async fn apply_team_level(
        &self,
        workspace_id: &str,
        new_total_xp: u64,
    ) -> Result<TeamLevelChange> {
        let mut state = self.load(workspace_id).await?;
        let previous_level = state.team_level;
        state.set_team_xp(new_total_xp);
        self.gateway.set_workspace_state(workspace_id, &state).await?;

        let change = TeamLevelChange {
            leveled_up: state.team_level > previous_level,
            previous_level,
            new_level: calculate_team_level(new_total_xp),
        };

        if change.leveled_up {
            info!(
                workspace_id,
                previous_level,
                new_level = change.new_level,
                team_xp = new_total_xp,
                "Team leveled up"
            );
            self.events.publish(GamificationEvent::TeamLevelUp {
                workspace_id: workspace_id.to_string(),
                previous_level,
                new_level: change.new_level,
            });
        }
        Ok(change)
    }

    /// Append one record per newly satisfied definition, in catalog order.
    ///
    /// Stops at the first failed append and returns the records that landed
    /// together with the error. Caller must hold the workspace lock.
    async fn unlock_new(
        &self,
        workspace_id: &str,
        user_id: &str,
        state: &WorkspaceAchievementState,
        snapshot: &ContextSnapshot,
        trigger: Option<TriggerKind>,
    ) -> (Vec<UnlockRecord>, Option<EngineError>) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let newly = evaluate(&self.catalog, state.unlocked_ids(), snapshot);
        debug!(
            workspace_id,
            candidates = newly.len(),
            counters = snapshot.len(),
            "Team catalog evaluated"
        );

        let mut records = Vec::with_capacity(newly.len());
        for def in newly {
            let mut metadata = Map::new();
            metadata.insert(META_XP_REWARD.to_string(), json!(def.xp_reward));
            metadata.insert("name".to_string(), json!(def.name));
            if let Some(kind) = trigger {
                metadata.insert(META_TRIGGER.to_string(), json!(kind.as_str()));
            }

            match self
                .gateway
                .append_achievement_unlock(workspace_id, &def.id, user_id, metadata)
                .await
            {
                Ok(record) => {
                    info!(
                        workspace_id,
                        achievement_id = %def.id,
                        unlocked_by = user_id,
                        xp_reward = def.xp_reward,
                        "Team achievement unlocked"
                    );
                    self.events.publish(GamificationEvent::TeamAchievementUnlocked {
                        workspace_id: workspace_id.to_string(),
                        record: record.clone(),
                    });
                    records.push(record);
                }
                Err(e) => {
                    error!(
                        workspace_id,
                        achievement_id = %def.id,
                        "Failed to record unlock: {}",
                        e
                    );
                    return (records, Some(e));
                }
            }
        }
        (records, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::counters;
    use crate::gateway::InMemoryGateway;

    fn service() -> (Arc<InMemoryGateway>, TeamAchievementService) {
        let gateway = Arc::new(InMemoryGateway::new());
        let service = TeamAchievementService::new(
            gateway.clone(),
            Arc::new(Catalog::team_defaults()),
            EventBus::default(),
        );
        (gateway, service)
    }

    #[tokio::test]
    async fn test_check_unlocks_and_sums_rewards() {
        let (gateway, service) = service();
        let ctx = ContextSnapshot::new().with(counters::MEMBER_COUNT, 5.0);

        let result = service
            .check_team_achievements("w1", "u1", &ctx, Some(TriggerKind::MemberAdded))
            .await
            .unwrap();

        assert_eq!(result.new_achievements.len(), 1);
        assert_eq!(result.new_achievements[0].achievement_id, "team-of-5");
        assert_eq!(result.new_achievements[0].unlocked_by_user_id, "u1");
        assert_eq!(result.total_xp, 100);

        let stored = gateway.workspace("w1").unwrap();
        assert_eq!(stored.team_xp, 100);
        assert_eq!(stored.unlocked_achievements[0].metadata["trigger"], "memberAdded");
    }

    #[tokio::test]
    async fn test_repeat_check_is_idempotent() {
        let (gateway, service) = service();
        let ctx = ContextSnapshot::new().with(counters::COMPLETED_TASKS, 1.0);

        service.check_team_achievements("w1", "u1", &ctx, None).await.unwrap();
        let again = service.check_team_achievements("w1", "u2", &ctx, None).await.unwrap();

        assert!(again.new_achievements.is_empty());
        assert_eq!(again.total_xp, 50);
        assert_eq!(gateway.workspace("w1").unwrap().unlocked_achievements.len(), 1);
        // Nothing new, so no team-level write
        assert_eq!(gateway.stats().workspace_writes, 1);
    }

    #[tokio::test]
    async fn test_team_level_up() {
        let (_, service) = service();
        let ctx = ContextSnapshot::new()
            .with(counters::COMPLETED_TASKS, 100.0)
            .with(counters::MEMBER_COUNT, 5.0)
            .with(counters::TOTAL_GMV, 50.0);

        let result = service.check_team_achievements("w1", "u1", &ctx, None).await.unwrap();
        // 50 + 250 + 100 + 100
        assert_eq!(result.total_xp, 500);
        assert_eq!(result.team_level, 2);
        assert!(result.leveled_up);
    }

    #[tokio::test]
    async fn test_update_team_level_recomputes() {
        let (gateway, service) = service();
        let up = service.update_team_level("w1", 3_000).await.unwrap();
        assert_eq!(up, TeamLevelChange { leveled_up: true, previous_level: 1, new_level: 4 });

        let down = service.update_team_level("w1", 600).await.unwrap();
        assert!(!down.leveled_up);
        assert_eq!(down.new_level, 2);
        assert_eq!(gateway.workspace("w1").unwrap().team_level, 2);
    }

    #[tokio::test]
    async fn test_recalculate_rederives_team_xp() {
        let (gateway, service) = service();
        let ctx = ContextSnapshot::new().with(counters::MEETINGS_LOGGED, 1.0);
        service.check_team_achievements("w1", "u1", &ctx, None).await.unwrap();

        // Drift the stored total
        service.update_team_level("w1", 9_999).await.unwrap();

        let full = ContextSnapshot::new()
            .with(counters::MEETINGS_LOGGED, 1.0)
            .with(counters::CONTACTS_ADDED, 1.0);
        let result = service.recalculate_all("w1", "admin", &full).await.unwrap();

        assert_eq!(result.new_achievements.len(), 1);
        assert_eq!(result.total_xp, 100);
        assert_eq!(gateway.workspace("w1").unwrap().team_xp, 100);
    }

    #[tokio::test]
    async fn test_check_settles_stale_team_xp() {
        let (gateway, service) = service();
        let ctx = ContextSnapshot::new().with(counters::CONTACTS_ADDED, 1.0);
        service.check_team_achievements("w1", "u1", &ctx, None).await.unwrap();
        service.update_team_level("w1", 0).await.unwrap();

        let result = service.check_team_achievements("w1", "u1", &ctx, None).await.unwrap();
        assert!(result.new_achievements.is_empty());
        assert_eq!(result.total_xp, 50);
        assert_eq!(gateway.workspace("w1").unwrap().team_xp, 50);
    }

    #[tokio::test]
    async fn test_ensure_workspace_once() {
        let (gateway, service) = service();
        service.ensure_workspace("w1").await.unwrap();
        service.ensure_workspace("w1").await.unwrap();
        assert_eq!(gateway.stats().workspace_writes, 1);
        assert_eq!(gateway.workspace("w1").unwrap().team_level, 1);
    }
}
