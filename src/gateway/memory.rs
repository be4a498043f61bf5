//! In-memory persistence gateway
//!
//! Process-local store backed by `DashMap`. Used by the replay binary and
//! tests; call counters make write coalescing observable.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::PersistenceGateway;
use crate::state::{UnlockRecord, UserGamificationState, WorkspaceAchievementState};
use crate::types::Result;

/// Call counters for the in-memory gateway
#[derive(Debug, Default)]
struct Counters {
    user_reads: AtomicU64,
    user_writes: AtomicU64,
    workspace_reads: AtomicU64,
    workspace_writes: AtomicU64,
    unlock_appends: AtomicU64,
}

/// Snapshot of gateway call counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub user_reads: u64,
    pub user_writes: u64,
    pub workspace_reads: u64,
    pub workspace_writes: u64,
    pub unlock_appends: u64,
}

/// `DashMap`-backed gateway
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    users: DashMap<String, UserGamificationState>,
    workspaces: DashMap<String, WorkspaceAchievementState>,
    counters: Counters,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            user_reads: self.counters.user_reads.load(Ordering::Relaxed),
            user_writes: self.counters.user_writes.load(Ordering::Relaxed),
            workspace_reads: self.counters.workspace_reads.load(Ordering::Relaxed),
            workspace_writes: self.counters.workspace_writes.load(Ordering::Relaxed),
            unlock_appends: self.counters.unlock_appends.load(Ordering::Relaxed),
        }
    }

    /// Direct read without touching counters
    pub fn user(&self, user_id: &str) -> Option<UserGamificationState> {
        self.users.get(user_id).map(|s| s.clone())
    }

    /// Direct read without touching counters
    pub fn workspace(&self, workspace_id: &str) -> Option<WorkspaceAchievementState> {
        self.workspaces.get(workspace_id).map(|s| s.clone())
    }

    pub fn user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.users.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn workspace_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workspaces.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn get_user_state(&self, user_id: &str) -> Result<Option<UserGamificationState>> {
        self.counters.user_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.user(user_id))
    }

    async fn set_user_state(&self, user_id: &str, state: &UserGamificationState) -> Result<()> {
        self.counters.user_writes.fetch_add(1, Ordering::Relaxed);
        self.users.insert(user_id.to_string(), state.clone());
        Ok(())
    }

    async fn get_workspace_state(
        &self,
        workspace_id: &str,
    ) -> Result<Option<WorkspaceAchievementState>> {
        self.counters.workspace_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.workspace(workspace_id))
    }

    async fn set_workspace_state(
        &self,
        workspace_id: &str,
        state: &WorkspaceAchievementState,
    ) -> Result<()> {
        self.counters.workspace_writes.fetch_add(1, Ordering::Relaxed);
        let mut entry = self.workspaces.entry(workspace_id.to_string()).or_default();
        entry.team_xp = state.team_xp;
        entry.team_level = state.team_level;
        Ok(())
    }

    async fn append_achievement_unlock(
        &self,
        workspace_id: &str,
        achievement_id: &str,
        unlocked_by: &str,
        metadata: Map<String, Value>,
    ) -> Result<UnlockRecord> {
        self.counters.unlock_appends.fetch_add(1, Ordering::Relaxed);
        let record = UnlockRecord {
            achievement_id: achievement_id.to_string(),
            unlocked_by_user_id: unlocked_by.to_string(),
            unlocked_at: Utc::now(),
            metadata,
        };
        self.workspaces
            .entry(workspace_id.to_string())
            .or_default()
            .unlocked_achievements
            .push(record.clone());
        debug!(workspace_id, achievement_id, "Unlock record appended");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_round_trip() {
        let gateway = InMemoryGateway::new();
        assert!(gateway.get_user_state("u1").await.unwrap().is_none());

        let mut state = UserGamificationState::default();
        state.set_xp(42);
        gateway.set_user_state("u1", &state).await.unwrap();

        assert_eq!(gateway.get_user_state("u1").await.unwrap(), Some(state));
        let stats = gateway.stats();
        assert_eq!(stats.user_reads, 2);
        assert_eq!(stats.user_writes, 1);
    }

    #[tokio::test]
    async fn test_set_workspace_keeps_unlock_list() {
        let gateway = InMemoryGateway::new();
        gateway
            .append_achievement_unlock("w1", "team-first-task", "u1", Map::new())
            .await
            .unwrap();

        // A stale state with no records must not wipe the append-only list
        let mut stale = WorkspaceAchievementState::default();
        stale.set_team_xp(500);
        gateway.set_workspace_state("w1", &stale).await.unwrap();

        let stored = gateway.workspace("w1").unwrap();
        assert_eq!(stored.team_xp, 500);
        assert_eq!(stored.team_level, 2);
        assert_eq!(stored.unlocked_achievements.len(), 1);
    }
}
