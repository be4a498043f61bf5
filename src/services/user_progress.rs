//! Per-user XP, level, streak and achievement updates
//!
//! Every transition is a re-derivation from the previous state: level from
//! xp, streak from the last activity day, achievements as a set union. A
//! retried or duplicated call therefore cannot corrupt state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::catalog::{AchievementId, Catalog};
use crate::clock::Clock;
use crate::context::ContextSnapshot;
use crate::evaluator::evaluate_ids;
use crate::events::{EventBus, GamificationEvent};
use crate::gateway::PersistenceGateway;
use crate::state::UserGamificationState;
use crate::streak::next_streak;
use crate::types::Result;

/// Result of applying an XP award
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardResult {
    pub state: UserGamificationState,
    pub new_achievements: Vec<AchievementId>,
    pub leveled_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_level: Option<u32>,
    /// XP added by this award (merged total for coalesced awards)
    pub xp_awarded: u64,
}

/// Applies user-level progress and persists it
pub struct UserProgressService {
    gateway: Arc<dyn PersistenceGateway>,
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl UserProgressService {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            gateway,
            catalog,
            clock,
            events,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Pure state transition for one award on today's date.
    ///
    /// Achievement rewards are reported through events but are not folded
    /// into the user's xp; only the awarded amount is.
    pub fn apply_award(
        &self,
        current: &UserGamificationState,
        amount: u64,
        snapshot: &ContextSnapshot,
    ) -> AwardResult {
        let mut state = current.clone();

        let streak = next_streak(current.last_activity_date, current.streak, self.clock.today());
        state.streak = streak.streak;
        state.last_activity_date = streak.last_activity_date;

        state.set_xp(current.xp.saturating_add(amount));

        let ctx = state.evaluation_context(snapshot);
        let new_achievements = evaluate_ids(&self.catalog, &state.achievements, &ctx);
        state.unlock(new_achievements.iter().cloned());

        let leveled_up = state.level > current.level;
        AwardResult {
            new_level: leveled_up.then_some(state.level),
            leveled_up,
            new_achievements,
            xp_awarded: amount,
            state,
        }
    }

    /// Apply an award on top of the caller's view of the state and persist it.
    pub async fn award_xp(
        &self,
        user_id: &str,
        current: &UserGamificationState,
        amount: u64,
        snapshot: &ContextSnapshot,
        reason: Option<&str>,
    ) -> Result<AwardResult> {
        let result = self.apply_award(current, amount, snapshot);
        self.gateway.set_user_state(user_id, &result.state).await?;

        info!(
            user_id,
            amount,
            reason = reason.unwrap_or("unspecified"),
            xp = result.state.xp,
            level = result.state.level,
            unlocked = result.new_achievements.len(),
            "XP awarded"
        );
        self.publish(user_id, current.level, &result);
        Ok(result)
    }

    /// Apply an award against the stored state (used by the batch flush).
    pub async fn award_from_store(
        &self,
        user_id: &str,
        amount: u64,
        snapshot: &ContextSnapshot,
        reasons: &[String],
    ) -> Result<AwardResult> {
        let current = self.load(user_id).await?;
        let reason = reasons.join(", ");
        self.award_xp(user_id, &current, amount, snapshot, Some(reason.as_str()))
            .await
    }

    /// Record activity for today without granting XP.
    ///
    /// Same-day repeats that unlock nothing skip the write entirely.
    pub async fn track_activity(
        &self,
        user_id: &str,
        current: &UserGamificationState,
        snapshot: &ContextSnapshot,
    ) -> Result<UserGamificationState> {
        let result = self.apply_award(current, 0, snapshot);
        if result.state == *current {
            debug!(user_id, "Activity already tracked today");
            return Ok(result.state);
        }

        self.gateway.set_user_state(user_id, &result.state).await?;
        debug!(
            user_id,
            streak = result.state.streak,
            unlocked = result.new_achievements.len(),
            "Activity tracked"
        );
        self.publish(user_id, current.level, &result);
        Ok(result.state)
    }

    /// Replace a user's progress with the zero state
    pub async fn reset_progress(&self, user_id: &str) -> Result<UserGamificationState> {
        let state = UserGamificationState::default();
        self.gateway.set_user_state(user_id, &state).await?;
        info!(user_id, "Gamification progress reset");
        Ok(state)
    }

    /// Stored state, or the zero state for a user with no record yet
    pub async fn load(&self, user_id: &str) -> Result<UserGamificationState> {
        Ok(self
            .gateway
            .get_user_state(user_id)
            .await?
            .unwrap_or_default())
    }

    fn publish(&self, user_id: &str, previous_level: u32, result: &AwardResult) {
        for id in &result.new_achievements {
            let xp_reward = self.catalog.get(id).map(|d| d.xp_reward).unwrap_or(0);
            self.events.publish(GamificationEvent::AchievementUnlocked {
                user_id: user_id.to_string(),
                achievement_id: id.clone(),
                xp_reward,
            });
        }
        if result.leveled_up {
            self.events.publish(GamificationEvent::LevelUp {
                user_id: user_id.to_string(),
                previous_level,
                new_level: result.state.level,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::context::counters;
    use crate::gateway::InMemoryGateway;
    use chrono::NaiveDate;

    fn service(day: NaiveDate) -> (Arc<InMemoryGateway>, Arc<FixedClock>, UserProgressService) {
        let gateway = Arc::new(InMemoryGateway::new());
        let clock = Arc::new(FixedClock::at_day(day));
        let service = UserProgressService::new(
            gateway.clone(),
            Arc::new(Catalog::user_defaults()),
            clock.clone(),
            EventBus::default(),
        );
        (gateway, clock, service)
    }

    fn day0() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[tokio::test]
    async fn test_first_task_award() {
        let (gateway, _, service) = service(day0());
        let ctx = ContextSnapshot::new().with(counters::COMPLETED_TASKS, 1.0);

        let result = service
            .award_xp("u1", &UserGamificationState::default(), 10, &ctx, Some("task"))
            .await
            .unwrap();

        assert_eq!(result.state.xp, 10);
        assert_eq!(result.state.level, 1);
        assert_eq!(result.state.streak, 1);
        assert_eq!(result.state.achievements, vec!["first-task"]);
        assert!(!result.leveled_up);
        assert_eq!(result.new_level, None);
        assert_eq!(gateway.user("u1"), Some(result.state));
    }

    #[tokio::test]
    async fn test_level_up_reported() {
        let (_, _, service) = service(day0());
        let mut current = UserGamificationState::default();
        current.set_xp(140);

        let result = service
            .award_xp("u1", &current, 20, &ContextSnapshot::new(), None)
            .await
            .unwrap();

        assert!(result.leveled_up);
        assert_eq!(result.new_level, Some(2));
    }

    #[tokio::test]
    async fn test_streak_achievement_uses_state_streak() {
        let (_, clock, service) = service(day0());
        let mut state = UserGamificationState::default();
        for _ in 0..3 {
            state = service
                .track_activity("u1", &state, &ContextSnapshot::new())
                .await
                .unwrap();
            clock.advance_days(1);
        }
        assert_eq!(state.streak, 3);
        assert!(state.has_achievement("streak-3"));
    }

    #[tokio::test]
    async fn test_same_day_track_skips_write() {
        let (gateway, _, service) = service(day0());
        let state = service
            .track_activity("u1", &UserGamificationState::default(), &ContextSnapshot::new())
            .await
            .unwrap();
        let again = service
            .track_activity("u1", &state, &ContextSnapshot::new())
            .await
            .unwrap();

        assert_eq!(state, again);
        assert_eq!(gateway.stats().user_writes, 1);
    }

    #[tokio::test]
    async fn test_reset_progress() {
        let (gateway, _, service) = service(day0());
        let ctx = ContextSnapshot::new().with(counters::COMPLETED_TASKS, 1.0);
        service
            .award_xp("u1", &UserGamificationState::default(), 500, &ctx, None)
            .await
            .unwrap();

        let state = service.reset_progress("u1").await.unwrap();
        assert_eq!(state, UserGamificationState::default());
        assert_eq!(gateway.user("u1"), Some(UserGamificationState::default()));
    }
}
