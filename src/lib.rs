//! Achievement engine - gamification for workspace productivity
//!
//! Turns user and team activity (tasks completed, contacts added, revenue
//! logged) into XP, levels, streaks and unlocked achievements, persists the
//! result through a gateway and broadcasts it as events.
//!
//! ## Components
//!
//! - **Level / Streak**: pure XP→level and day-to-day streak arithmetic
//! - **Catalog / Evaluator**: declarative achievement criteria, idempotent evaluation
//! - **Services**: user progress and team achievement updates
//! - **Coalesce**: per-user XP batching, per-workspace debounce and dedup
//! - **Engine**: facade wiring it all around one [`gateway::PersistenceGateway`]

pub mod catalog;
pub mod clock;
pub mod coalesce;
pub mod config;
pub mod context;
pub mod engine;
pub mod evaluator;
pub mod events;
pub mod gateway;
pub mod level;
pub mod replay;
pub mod services;
pub mod state;
pub mod streak;
pub mod trigger;
pub mod types;

pub use catalog::{AchievementDefinition, AchievementId, Catalog, Criterion};
pub use coalesce::AwardOutcome;
pub use config::Args;
pub use context::{counters, ContextSnapshot};
pub use engine::{EngineConfig, GamificationEngine};
pub use events::{EventEnvelope, GamificationEvent};
pub use services::{AwardResult, TeamCheckResult, TeamLevelChange};
pub use state::{UnlockRecord, UserGamificationState, WorkspaceAchievementState};
pub use trigger::TriggerKind;
pub use types::{EngineError, Result};
