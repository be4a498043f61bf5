//! Persisted gamification state for users and workspaces

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::AchievementId;
use crate::context::{counters, ContextSnapshot};
use crate::level::{calculate_level, calculate_team_level};

/// Metadata key holding the XP reward granted by an unlock record
pub const META_XP_REWARD: &str = "xpReward";
/// Metadata key holding the trigger kind that produced an unlock record
pub const META_TRIGGER: &str = "trigger";

/// Per-user progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGamificationState {
    pub xp: u64,
    /// Always `calculate_level(xp)`
    pub level: u32,
    pub streak: u32,
    pub last_activity_date: Option<NaiveDate>,
    /// Unlocked achievement ids in unlock order, no duplicates
    #[serde(default)]
    pub achievements: Vec<AchievementId>,
}

impl Default for UserGamificationState {
    fn default() -> Self {
        Self {
            xp: 0,
            level: 1,
            streak: 0,
            last_activity_date: None,
            achievements: Vec::new(),
        }
    }
}

impl UserGamificationState {
    pub fn has_achievement(&self, id: &str) -> bool {
        self.achievements.iter().any(|a| a == id)
    }

    /// Append ids not already present. Returns how many were added.
    pub fn unlock<I: IntoIterator<Item = AchievementId>>(&mut self, ids: I) -> usize {
        let mut added = 0;
        for id in ids {
            if !self.has_achievement(&id) {
                self.achievements.push(id);
                added += 1;
            }
        }
        added
    }

    /// Set xp and re-derive level
    pub fn set_xp(&mut self, xp: u64) {
        self.xp = xp;
        self.level = calculate_level(xp);
    }

    /// Caller counters overlaid with this state's own xp, level and streak
    pub fn evaluation_context(&self, snapshot: &ContextSnapshot) -> ContextSnapshot {
        let mut ctx = snapshot.clone();
        ctx.set(counters::XP, self.xp as f64);
        ctx.set(counters::LEVEL, f64::from(self.level));
        ctx.set(counters::STREAK, f64::from(self.streak));
        ctx
    }
}

/// Append-only record of one team achievement unlock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRecord {
    pub achievement_id: AchievementId,
    pub unlocked_by_user_id: String,
    pub unlocked_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl UnlockRecord {
    /// XP reward recorded at unlock time
    pub fn xp_reward(&self) -> Option<u64> {
        self.metadata.get(META_XP_REWARD).and_then(Value::as_u64)
    }
}

/// Per-workspace team progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceAchievementState {
    pub team_xp: u64,
    /// Always `calculate_team_level(team_xp)`
    pub team_level: u32,
    #[serde(default)]
    pub unlocked_achievements: Vec<UnlockRecord>,
}

impl Default for WorkspaceAchievementState {
    fn default() -> Self {
        Self {
            team_xp: 0,
            team_level: 1,
            unlocked_achievements: Vec::new(),
        }
    }
}

impl WorkspaceAchievementState {
    pub fn unlocked_ids(&self) -> impl Iterator<Item = &str> {
        self.unlocked_achievements
            .iter()
            .map(|r| r.achievement_id.as_str())
    }

    pub fn has_achievement(&self, id: &str) -> bool {
        self.unlocked_ids().any(|a| a == id)
    }

    /// Set team xp and re-derive team level
    pub fn set_team_xp(&mut self, team_xp: u64) {
        self.team_xp = team_xp;
        self.team_level = calculate_team_level(team_xp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let user = UserGamificationState::default();
        assert_eq!(user.level, 1);
        assert_eq!(user.xp, 0);
        assert!(user.last_activity_date.is_none());

        let ws = WorkspaceAchievementState::default();
        assert_eq!(ws.team_level, 1);
    }

    #[test]
    fn test_unlock_is_union() {
        let mut user = UserGamificationState::default();
        assert_eq!(user.unlock(vec!["a".to_string(), "b".to_string()]), 2);
        assert_eq!(user.unlock(vec!["b".to_string(), "c".to_string()]), 1);
        assert_eq!(user.achievements, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_set_xp_derives_level() {
        let mut user = UserGamificationState::default();
        user.set_xp(150);
        assert_eq!(user.level, 2);
        user.set_xp(10);
        assert_eq!(user.level, 1);
    }

    #[test]
    fn test_state_overrides_context() {
        let mut user = UserGamificationState::default();
        user.streak = 4;
        let ctx = user.evaluation_context(&ContextSnapshot::new().with(counters::STREAK, 99.0));
        assert_eq!(ctx.get(counters::STREAK), Some(4.0));
        assert_eq!(ctx.get(counters::LEVEL), Some(1.0));
    }

    #[test]
    fn test_user_state_json_shape() {
        let json = serde_json::to_value(UserGamificationState::default()).unwrap();
        assert_eq!(json["lastActivityDate"], Value::Null);
        assert_eq!(json["achievements"], serde_json::json!([]));
    }
}
