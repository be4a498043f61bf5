//! Update coalescing layers
//!
//! - [`xp`] merges per-user XP grants into one write per flush
//! - [`team`] dedups and debounces team achievement checks
//! - [`batch`] and [`dedup`] are the generic keyed primitives behind them

pub mod batch;
pub mod dedup;
pub mod team;
pub mod xp;

pub use batch::{BatchJob, BatchQueue, BatchStatsSnapshot};
pub use dedup::{DedupCache, DedupCacheConfig, DedupStatsSnapshot};
pub use team::{TeamAchievementCoalescer, TeamCheckKey, TeamCoalescerStats};
pub use xp::{AwardOutcome, FlushReport, XpAwardCoalescer, XpStatsSnapshot};
