//! Services that apply progress and persist it through the gateway

pub mod team;
pub mod user_progress;

pub use team::{TeamAchievementService, TeamCheckResult, TeamLevelChange};
pub use user_progress::{AwardResult, UserProgressService};
