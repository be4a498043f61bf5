//! Persistence gateway
//!
//! The store behind gamification state is external (document DB, REST
//! backend). The engine only talks to it through [`PersistenceGateway`], so
//! production backends and the in-memory store used by tests and the replay
//! binary are interchangeable.

pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::state::{UnlockRecord, UserGamificationState, WorkspaceAchievementState};
use crate::types::Result;

pub use memory::{GatewayStats, InMemoryGateway};

/// Read/write access to user and workspace gamification state.
///
/// Every call is I/O and may fail transiently.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Load a user's state, `None` if no profile state exists yet
    async fn get_user_state(&self, user_id: &str) -> Result<Option<UserGamificationState>>;

    /// Replace a user's state
    async fn set_user_state(&self, user_id: &str, state: &UserGamificationState) -> Result<()>;

    /// Load a workspace's state, `None` if it has never been written
    async fn get_workspace_state(
        &self,
        workspace_id: &str,
    ) -> Result<Option<WorkspaceAchievementState>>;

    /// Persist team XP and team level.
    ///
    /// The unlock list is append-only and is never replaced through this call.
    async fn set_workspace_state(
        &self,
        workspace_id: &str,
        state: &WorkspaceAchievementState,
    ) -> Result<()>;

    /// Append one unlock record and return it as stored
    async fn append_achievement_unlock(
        &self,
        workspace_id: &str,
        achievement_id: &str,
        unlocked_by: &str,
        metadata: Map<String, Value>,
    ) -> Result<UnlockRecord>;
}
