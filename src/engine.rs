//! Gamification engine facade
//!
//! Wires the services and coalescers around one persistence gateway. Built
//! once at startup and shared behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::coalesce::{
    AwardOutcome, DedupCacheConfig, FlushReport, TeamAchievementCoalescer, TeamCoalescerStats,
    XpAwardCoalescer, XpStatsSnapshot,
};
use crate::context::ContextSnapshot;
use crate::events::{EventBus, EventEnvelope};
use crate::gateway::PersistenceGateway;
use crate::services::{
    TeamAchievementService, TeamCheckResult, TeamLevelChange, UserProgressService,
};
use crate::state::{UserGamificationState, WorkspaceAchievementState};
use crate::trigger::TriggerKind;
use crate::types::Result;

// =============================================================================
// Configuration
// =============================================================================

/// Timing and channel settings for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between the first queued XP award and the flush
    pub xp_flush_delay: Duration,
    /// Debounce per (workspace, trigger) key
    pub team_debounce: Duration,
    /// How long a team check suppresses repeats for its key
    pub dedup_window: Duration,
    /// Sweep interval for expired dedup entries
    pub dedup_cleanup_interval: Duration,
    /// Broadcast channel capacity for gamification events
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            xp_flush_delay: Duration::from_secs(2),
            team_debounce: Duration::from_secs(1),
            dedup_window: Duration::from_secs(60),
            dedup_cleanup_interval: Duration::from_secs(300),
            event_capacity: 256,
        }
    }
}

/// Combined statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub xp: XpStatsSnapshot,
    pub team: TeamCoalescerStats,
}

// =============================================================================
// Builder
// =============================================================================

pub struct GamificationEngineBuilder {
    gateway: Arc<dyn PersistenceGateway>,
    config: EngineConfig,
    user_catalog: Option<Catalog>,
    team_catalog: Option<Catalog>,
    clock: Option<Arc<dyn Clock>>,
}

impl GamificationEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn user_catalog(mut self, catalog: Catalog) -> Self {
        self.user_catalog = Some(catalog);
        self
    }

    pub fn team_catalog(mut self, catalog: Catalog) -> Self {
        self.team_catalog = Some(catalog);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> GamificationEngine {
        let config = self.config;
        let events = EventBus::new(config.event_capacity);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::default()));

        let user_catalog = Arc::new(self.user_catalog.unwrap_or_else(Catalog::user_defaults));
        let team_catalog = Arc::new(self.team_catalog.unwrap_or_else(Catalog::team_defaults));

        let progress = Arc::new(UserProgressService::new(
            Arc::clone(&self.gateway),
            user_catalog,
            clock,
            events.clone(),
        ));
        let team = Arc::new(TeamAchievementService::new(
            Arc::clone(&self.gateway),
            team_catalog,
            events.clone(),
        ));

        let xp = XpAwardCoalescer::new(Arc::clone(&progress), config.xp_flush_delay);
        let triggers = TeamAchievementCoalescer::new(
            Arc::clone(&team),
            config.team_debounce,
            DedupCacheConfig {
                window: config.dedup_window,
                cleanup_interval: config.dedup_cleanup_interval,
            },
        );

        info!(
            user_achievements = progress.catalog().len(),
            team_achievements = team.catalog().len(),
            xp_flush_delay_ms = config.xp_flush_delay.as_millis() as u64,
            team_debounce_ms = config.team_debounce.as_millis() as u64,
            dedup_window_secs = config.dedup_window.as_secs(),
            "Gamification engine ready"
        );

        GamificationEngine {
            config,
            events,
            progress,
            team,
            xp,
            triggers,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct GamificationEngine {
    config: EngineConfig,
    events: EventBus,
    progress: Arc<UserProgressService>,
    team: Arc<TeamAchievementService>,
    xp: XpAwardCoalescer,
    triggers: TeamAchievementCoalescer,
}

impl GamificationEngine {
    pub fn builder(gateway: Arc<dyn PersistenceGateway>) -> GamificationEngineBuilder {
        GamificationEngineBuilder {
            gateway,
            config: EngineConfig::default(),
            user_catalog: None,
            team_catalog: None,
            clock: None,
        }
    }

    /// Engine with default catalogs, system clock and timings
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self::builder(gateway).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // User progress
    // -------------------------------------------------------------------------

    /// Award XP. With `batch` the award joins the user's pending batch and
    /// `Queued` is returned; otherwise it is applied right away.
    pub async fn award_xp(
        &self,
        user_id: &str,
        current: &UserGamificationState,
        amount: u64,
        snapshot: &ContextSnapshot,
        reason: Option<&str>,
        batch: bool,
    ) -> Result<AwardOutcome> {
        self.xp
            .award(user_id, current, amount, snapshot, reason, !batch)
            .await
    }

    pub async fn track_activity(
        &self,
        user_id: &str,
        current: &UserGamificationState,
        snapshot: &ContextSnapshot,
    ) -> Result<UserGamificationState> {
        self.progress.track_activity(user_id, current, snapshot).await
    }

    pub async fn reset_progress(&self, user_id: &str) -> Result<UserGamificationState> {
        self.progress.reset_progress(user_id).await
    }

    pub async fn user_state(&self, user_id: &str) -> Result<UserGamificationState> {
        self.progress.load(user_id).await
    }

    /// Apply all queued XP now
    pub async fn flush_pending(&self) -> FlushReport {
        self.xp.flush().await
    }

    // -------------------------------------------------------------------------
    // Team achievements
    // -------------------------------------------------------------------------

    /// Evaluate immediately, bypassing both coalescing layers
    pub async fn check_team_achievements(
        &self,
        workspace_id: &str,
        user_id: &str,
        snapshot: &ContextSnapshot,
    ) -> Result<TeamCheckResult> {
        self.team
            .check_team_achievements(workspace_id, user_id, snapshot, None)
            .await
    }

    pub async fn check_team_achievements_batched(
        &self,
        workspace_id: &str,
        user_id: &str,
        snapshot: ContextSnapshot,
        trigger: TriggerKind,
    ) -> Result<TeamCheckResult> {
        self.triggers
            .check_batched(workspace_id, user_id, snapshot, trigger)
            .await
    }

    pub async fn check_team_achievements_cached(
        &self,
        workspace_id: &str,
        user_id: &str,
        snapshot: ContextSnapshot,
        trigger: TriggerKind,
    ) -> Result<Option<TeamCheckResult>> {
        self.triggers
            .check_cached(workspace_id, user_id, snapshot, trigger)
            .await
    }

    /// Trigger helpers for CRUD services
    pub fn triggers(&self) -> &TeamAchievementCoalescer {
        &self.triggers
    }

    pub async fn recalculate_all(
        &self,
        workspace_id: &str,
        user_id: &str,
        snapshot: &ContextSnapshot,
    ) -> Result<TeamCheckResult> {
        self.team.recalculate_all(workspace_id, user_id, snapshot).await
    }

    pub async fn update_team_level(
        &self,
        workspace_id: &str,
        new_total_xp: u64,
    ) -> Result<TeamLevelChange> {
        self.team.update_team_level(workspace_id, new_total_xp).await
    }

    pub async fn ensure_workspace(&self, workspace_id: &str) -> Result<WorkspaceAchievementState> {
        self.team.ensure_workspace(workspace_id).await
    }

    pub async fn workspace_state(&self, workspace_id: &str) -> Result<WorkspaceAchievementState> {
        self.team.load(workspace_id).await
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    /// Start periodic maintenance (dedup sweep)
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![self.triggers.spawn_cleanup()]
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            xp: self.xp.stats(),
            team: self.triggers.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::context::counters;
    use crate::events::GamificationEvent;
    use crate::gateway::InMemoryGateway;
    use chrono::NaiveDate;

    fn engine() -> (Arc<InMemoryGateway>, GamificationEngine) {
        let gateway = Arc::new(InMemoryGateway::new());
        let clock = Arc::new(FixedClock::at_day(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()));
        let engine = GamificationEngine::builder(gateway.clone()).clock(clock).build();
        (gateway, engine)
    }

    #[tokio::test]
    async fn test_immediate_award_publishes_unlock() {
        let (_, engine) = engine();
        let mut events = engine.subscribe();
        let ctx = ContextSnapshot::new().with(counters::COMPLETED_TASKS, 1.0);

        engine
            .award_xp("u1", &UserGamificationState::default(), 10, &ctx, Some("task"), false)
            .await
            .unwrap();

        let envelope = events.recv().await.unwrap();
        assert_eq!(
            envelope.event,
            GamificationEvent::AchievementUnlocked {
                user_id: "u1".into(),
                achievement_id: "first-task".into(),
                xp_reward: 10,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_batched_award_flushed_on_demand() {
        let (gateway, engine) = engine();
        let zero = UserGamificationState::default();
        let outcome = engine
            .award_xp("u1", &zero, 7, &ContextSnapshot::new(), None, true)
            .await
            .unwrap();
        assert_eq!(outcome, AwardOutcome::Queued { pending_xp: 7 });

        let report = engine.flush_pending().await;
        assert_eq!(report.xp_applied(), 7);
        assert_eq!(gateway.user("u1").unwrap().xp, 7);
    }

    #[tokio::test]
    async fn test_direct_team_check_and_state() {
        let (_, engine) = engine();
        engine.ensure_workspace("w1").await.unwrap();
        let ctx = ContextSnapshot::new().with(counters::DOCUMENTS_CREATED, 25.0);

        let result = engine.check_team_achievements("w1", "u1", &ctx).await.unwrap();
        assert_eq!(result.total_xp, 200);

        let state = engine.workspace_state("w1").await.unwrap();
        assert!(state.has_achievement("team-docs-25"));
    }
}
