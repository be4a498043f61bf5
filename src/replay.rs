//! Activity log replay
//!
//! Reads newline-delimited JSON activity and drives the engine with it the
//! way CRUD services would. Events are dispatched concurrently (offset by
//! `at_ms` when given) so both coalescing layers see realistic bursts.
//!
//! ```text
//! {"kind":"award_xp","user_id":"u1","amount":10,"context":{"completedTasks":1}}
//! {"kind":"team_trigger","workspace_id":"w1","user_id":"u1","trigger":"taskCompleted","value":1}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::coalesce::{AwardOutcome, FlushReport};
use crate::context::ContextSnapshot;
use crate::engine::GamificationEngine;
use crate::services::TeamCheckResult;
use crate::state::{UserGamificationState, WorkspaceAchievementState};
use crate::trigger::TriggerKind;
use crate::types::{EngineError, Result};

/// One activity to feed the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityEvent {
    AwardXp {
        user_id: String,
        amount: u64,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        context: ContextSnapshot,
        #[serde(default)]
        batch: bool,
    },
    TrackActivity {
        user_id: String,
        #[serde(default)]
        context: ContextSnapshot,
    },
    /// Goes through the dedup and debounce layers
    TeamTrigger {
        workspace_id: String,
        user_id: String,
        trigger: TriggerKind,
        value: f64,
    },
    /// Immediate team check, no coalescing
    CheckTeam {
        workspace_id: String,
        user_id: String,
        context: ContextSnapshot,
    },
    Recalculate {
        workspace_id: String,
        user_id: String,
        context: ContextSnapshot,
    },
    Reset {
        user_id: String,
    },
}

impl ActivityEvent {
    fn user_id(&self) -> &str {
        match self {
            ActivityEvent::AwardXp { user_id, .. }
            | ActivityEvent::TrackActivity { user_id, .. }
            | ActivityEvent::TeamTrigger { user_id, .. }
            | ActivityEvent::CheckTeam { user_id, .. }
            | ActivityEvent::Recalculate { user_id, .. }
            | ActivityEvent::Reset { user_id } => user_id,
        }
    }

    fn workspace_id(&self) -> Option<&str> {
        match self {
            ActivityEvent::TeamTrigger { workspace_id, .. }
            | ActivityEvent::CheckTeam { workspace_id, .. }
            | ActivityEvent::Recalculate { workspace_id, .. } => Some(workspace_id),
            _ => None,
        }
    }
}

/// A parsed log line with its dispatch offset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLine {
    /// Milliseconds after replay start to dispatch this event
    #[serde(default)]
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: ActivityEvent,
}

/// What a single event produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EventOutcome {
    Award { outcome: AwardOutcome },
    Activity { state: UserGamificationState },
    /// `check` is absent when the trigger was deduplicated or failed
    Team { check: Option<TeamCheckResult> },
    Reset { state: UserGamificationState },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct LineOutcome {
    /// 1-based line number in the activity log
    pub line: usize,
    #[serde(flatten)]
    pub outcome: EventOutcome,
}

/// Everything a replay produced
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub outcomes: Vec<LineOutcome>,
    pub flush: FlushReport,
    pub users: BTreeMap<String, UserGamificationState>,
    pub workspaces: BTreeMap<String, WorkspaceAchievementState>,
}

/// Parse an activity log. Blank lines and `#` comments are skipped.
///
/// Returns (line number, parsed line) pairs.
pub fn parse_activity_log(content: &str) -> Result<Vec<(usize, ActivityLine)>> {
    let mut lines = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line: ActivityLine = serde_json::from_str(trimmed)
            .map_err(|e| EngineError::Config(format!("activity line {}: {}", idx + 1, e)))?;
        lines.push((idx + 1, line));
    }
    Ok(lines)
}

/// Dispatch every line concurrently, drain queued XP and collect final state
pub async fn replay(
    engine: Arc<GamificationEngine>,
    lines: Vec<(usize, ActivityLine)>,
) -> Result<ReplayReport> {
    let mut user_ids = BTreeSet::new();
    let mut workspace_ids = BTreeSet::new();
    let mut tasks = JoinSet::new();

    info!(events = lines.len(), "Replaying activity");
    for (line_no, line) in lines {
        user_ids.insert(line.event.user_id().to_string());
        if let Some(ws) = line.event.workspace_id() {
            workspace_ids.insert(ws.to_string());
        }

        let engine = Arc::clone(&engine);
        tasks.spawn(async move {
            if line.at_ms > 0 {
                tokio::time::sleep(Duration::from_millis(line.at_ms)).await;
            }
            let outcome = dispatch(&engine, line.event)
                .await
                .unwrap_or_else(|e| EventOutcome::Failed { error: e.to_string() });
            LineOutcome {
                line: line_no,
                outcome,
            }
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!("Replay task aborted: {}", e),
        }
    }
    outcomes.sort_by_key(|o| o.line);

    let flush = engine.flush_pending().await;

    let mut users = BTreeMap::new();
    for id in user_ids {
        let state = engine.user_state(&id).await?;
        users.insert(id, state);
    }
    let mut workspaces = BTreeMap::new();
    for id in workspace_ids {
        let state = engine.workspace_state(&id).await?;
        workspaces.insert(id, state);
    }

    Ok(ReplayReport {
        outcomes,
        flush,
        users,
        workspaces,
    })
}

async fn dispatch(engine: &GamificationEngine, event: ActivityEvent) -> Result<EventOutcome> {
    debug!(?event, "Dispatching activity");
    match event {
        ActivityEvent::AwardXp {
            user_id,
            amount,
            reason,
            context,
            batch,
        } => {
            let current = engine.user_state(&user_id).await?;
            let outcome = engine
                .award_xp(&user_id, &current, amount, &context, reason.as_deref(), batch)
                .await?;
            Ok(EventOutcome::Award { outcome })
        }
        ActivityEvent::TrackActivity { user_id, context } => {
            let current = engine.user_state(&user_id).await?;
            let state = engine.track_activity(&user_id, &current, &context).await?;
            Ok(EventOutcome::Activity { state })
        }
        ActivityEvent::TeamTrigger {
            workspace_id,
            user_id,
            trigger,
            value,
        } => {
            let check = engine
                .triggers()
                .on_trigger(&workspace_id, &user_id, trigger, value)
                .await;
            Ok(EventOutcome::Team { check })
        }
        ActivityEvent::CheckTeam {
            workspace_id,
            user_id,
            context,
        } => {
            let check = engine
                .check_team_achievements(&workspace_id, &user_id, &context)
                .await?;
            Ok(EventOutcome::Team { check: Some(check) })
        }
        ActivityEvent::Recalculate {
            workspace_id,
            user_id,
            context,
        } => {
            let check = engine.recalculate_all(&workspace_id, &user_id, &context).await?;
            Ok(EventOutcome::Team { check: Some(check) })
        }
        ActivityEvent::Reset { user_id } => {
            let state = engine.reset_progress(&user_id).await?;
            Ok(EventOutcome::Reset { state })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_blank_and_comments() {
        let log = concat!(
            "\n# warm-up\n",
            r#"{"kind":"award_xp","user_id":"u1","amount":10,"context":{"completedTasks":1}}"#,
            "\n\n",
            r#"{"at_ms":250,"kind":"team_trigger","workspace_id":"w1","user_id":"u1","#,
            r#""trigger":"taskCompleted","value":1}"#,
            "\n",
        );
        let lines = parse_activity_log(log).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, 3);
        assert_eq!(lines[1].1.at_ms, 250);
        assert_eq!(
            lines[1].1.event,
            ActivityEvent::TeamTrigger {
                workspace_id: "w1".into(),
                user_id: "u1".into(),
                trigger: TriggerKind::TaskCompleted,
                value: 1.0,
            }
        );
    }

    #[test]
    fn test_parse_reports_line_number() {
        let log = "{\"kind\":\"reset\",\"user_id\":\"u1\"}\n{\"kind\":\"explode\"}\n";
        match parse_activity_log(log) {
            Err(EngineError::Config(msg)) => assert!(msg.contains("line 2"), "{}", msg),
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
