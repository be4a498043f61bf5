//! Configuration for the achievement engine binary
//!
//! CLI arguments with environment fallbacks, plus optional TOML catalogs.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::Catalog;
use crate::clock::SystemClock;
use crate::engine::EngineConfig;
use crate::types::{EngineError, Result};

/// Achievement engine - replays workspace activity through the gamification engine
#[derive(Parser, Debug, Clone)]
#[command(name = "achievement-engine")]
#[command(about = "Achievement evaluation and update-coalescing engine")]
pub struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Delay before queued XP awards are flushed, in milliseconds
    #[arg(long, env = "XP_FLUSH_DELAY_MS", default_value = "2000")]
    pub xp_flush_delay_ms: u64,

    /// Debounce for team achievement checks per (workspace, trigger), in milliseconds
    #[arg(long, env = "TEAM_DEBOUNCE_MS", default_value = "1000")]
    pub team_debounce_ms: u64,

    /// Window in which repeated team checks for the same key are dropped, in seconds
    #[arg(long, env = "DEDUP_WINDOW_SECS", default_value = "60")]
    pub dedup_window_secs: u64,

    /// How often expired dedup entries are swept, in seconds
    #[arg(long, env = "DEDUP_CLEANUP_INTERVAL_SECS", default_value = "300")]
    pub dedup_cleanup_interval_secs: u64,

    /// Capacity of the gamification event channel
    #[arg(long, env = "EVENT_CAPACITY", default_value = "256")]
    pub event_capacity: usize,

    /// Offset from UTC, in minutes, of the day boundary used for streaks
    #[arg(long, env = "DAY_OFFSET_MINUTES", default_value = "0", allow_hyphen_values = true)]
    pub day_offset_minutes: i32,

    /// TOML file with the user achievement catalog (built-in catalog if unset)
    #[arg(long, env = "USER_CATALOG")]
    pub user_catalog: Option<PathBuf>,

    /// TOML file with the team achievement catalog (built-in catalog if unset)
    #[arg(long, env = "TEAM_CATALOG")]
    pub team_catalog: Option<PathBuf>,

    /// Activity log to replay, one JSON event per line (stdin if unset)
    #[arg(long, env = "ACTIVITY_FILE")]
    pub activity_file: Option<PathBuf>,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.xp_flush_delay_ms == 0 {
            return Err("XP_FLUSH_DELAY_MS must be greater than zero".to_string());
        }

        if self.dedup_window_secs == 0 {
            return Err("DEDUP_WINDOW_SECS must be greater than zero".to_string());
        }

        if self.dedup_cleanup_interval_secs == 0 {
            return Err("DEDUP_CLEANUP_INTERVAL_SECS must be greater than zero".to_string());
        }

        if self.event_capacity == 0 {
            return Err("EVENT_CAPACITY must be greater than zero".to_string());
        }

        if self.day_offset_minutes.abs() >= 24 * 60 {
            return Err("DAY_OFFSET_MINUTES must be within ±1439".to_string());
        }

        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            xp_flush_delay: Duration::from_millis(self.xp_flush_delay_ms),
            team_debounce: Duration::from_millis(self.team_debounce_ms),
            dedup_window: Duration::from_secs(self.dedup_window_secs),
            dedup_cleanup_interval: Duration::from_secs(self.dedup_cleanup_interval_secs),
            event_capacity: self.event_capacity,
        }
    }

    /// Wall clock with the configured day boundary
    pub fn clock(&self) -> Result<Arc<SystemClock>> {
        SystemClock::with_offset_minutes(self.day_offset_minutes)
            .map(Arc::new)
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "invalid day offset: {} minutes",
                    self.day_offset_minutes
                ))
            })
    }

    /// Load the (user, team) catalogs, falling back to the built-in ones
    pub fn load_catalogs(&self) -> Result<(Catalog, Catalog)> {
        let user = match &self.user_catalog {
            Some(path) => Catalog::load(path)?,
            None => Catalog::user_defaults(),
        };
        let team = match &self.team_catalog {
            Some(path) => Catalog::load(path)?,
            None => Catalog::team_defaults(),
        };
        Ok((user, team))
    }
}
