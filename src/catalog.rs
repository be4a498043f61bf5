//! Achievement catalogs
//!
//! A catalog is an ordered, read-only list of achievement definitions. User
//! and team catalogs are distinct. Definitions carry a declarative criterion
//! over a [`ContextSnapshot`] so that catalogs can be shipped as TOML next
//! to a deployment instead of being compiled in.
//!
//! ```toml
//! [[achievements]]
//! id = "first-task"
//! name = "First Steps"
//! description = "Complete your first task"
//! xp_reward = 10
//! criterion = { at_least = { counter = "completedTasks", value = 1 } }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::context::{counters, ContextSnapshot};
use crate::types::{EngineError, Result};

/// Achievement identifier (e.g. `first-task`)
pub type AchievementId = String;

/// Boolean predicate over a context snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Counter is present and `>= value`
    AtLeast { counter: String, value: f64 },
    /// Every child holds
    All(Vec<Criterion>),
    /// At least one child holds
    Any(Vec<Criterion>),
}

impl Criterion {
    pub fn at_least(counter: &str, value: f64) -> Self {
        Criterion::AtLeast {
            counter: counter.to_string(),
            value,
        }
    }

    /// Evaluate against a snapshot. Missing counters never match.
    pub fn matches(&self, snapshot: &ContextSnapshot) -> bool {
        match self {
            Criterion::AtLeast { counter, value } => {
                snapshot.get(counter).is_some_and(|actual| actual >= *value)
            }
            Criterion::All(children) => children.iter().all(|c| c.matches(snapshot)),
            Criterion::Any(children) => children.iter().any(|c| c.matches(snapshot)),
        }
    }
}

/// One unlockable milestone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementDefinition {
    pub id: AchievementId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub xp_reward: u64,
    pub criterion: Criterion,
}

impl AchievementDefinition {
    pub fn new(
        id: &str,
        name: &str,
        description: &str,
        xp_reward: u64,
        criterion: Criterion,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            xp_reward,
            criterion,
        }
    }
}

/// Ordered set of achievement definitions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    achievements: Vec<AchievementDefinition>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate ids.
    pub fn new(achievements: Vec<AchievementDefinition>) -> Result<Self> {
        let mut seen = HashSet::new();
        for def in &achievements {
            if def.id.trim().is_empty() {
                return Err(EngineError::Catalog("achievement with empty id".into()));
            }
            if !seen.insert(def.id.as_str()) {
                return Err(EngineError::Catalog(format!("duplicate achievement id: {}", def.id)));
            }
        }
        Ok(Self { achievements })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: Catalog = toml::from_str(content)
            .map_err(|e| EngineError::Catalog(format!("invalid catalog TOML: {}", e)))?;
        Self::new(raw.achievements)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Catalog(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn get(&self, id: &str) -> Option<&AchievementDefinition> {
        self.achievements.iter().find(|def| def.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AchievementDefinition> {
        self.achievements.iter()
    }

    pub fn len(&self) -> usize {
        self.achievements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.achievements.is_empty()
    }

    /// Built-in catalog of personal achievements
    pub fn user_defaults() -> Self {
        use counters::*;
        Self {
            achievements: vec![
                AchievementDefinition::new(
                    "first-task",
                    "First Steps",
                    "Complete your first task",
                    10,
                    Criterion::at_least(COMPLETED_TASKS, 1.0),
                ),
                AchievementDefinition::new(
                    "task-10",
                    "Getting Things Done",
                    "Complete 10 tasks",
                    25,
                    Criterion::at_least(COMPLETED_TASKS, 10.0),
                ),
                AchievementDefinition::new(
                    "task-50",
                    "Taskmaster",
                    "Complete 50 tasks",
                    75,
                    Criterion::at_least(COMPLETED_TASKS, 50.0),
                ),
                AchievementDefinition::new(
                    "task-100",
                    "Centurion",
                    "Complete 100 tasks",
                    150,
                    Criterion::at_least(COMPLETED_TASKS, 100.0),
                ),
                AchievementDefinition::new(
                    "first-contact",
                    "Networker",
                    "Add your first contact",
                    10,
                    Criterion::at_least(CONTACTS_ADDED, 1.0),
                ),
                AchievementDefinition::new(
                    "contacts-25",
                    "Rolodex",
                    "Add 25 contacts",
                    50,
                    Criterion::at_least(CONTACTS_ADDED, 25.0),
                ),
                AchievementDefinition::new(
                    "first-meeting",
                    "Face Time",
                    "Log your first meeting",
                    10,
                    Criterion::at_least(MEETINGS_LOGGED, 1.0),
                ),
                AchievementDefinition::new(
                    "first-document",
                    "Scribe",
                    "Create your first document",
                    10,
                    Criterion::at_least(DOCUMENTS_CREATED, 1.0),
                ),
                AchievementDefinition::new(
                    "first-sale",
                    "Rainmaker",
                    "Log your first revenue",
                    25,
                    Criterion::at_least(TOTAL_GMV, 0.01),
                ),
                AchievementDefinition::new(
                    "streak-3",
                    "On a Roll",
                    "Stay active 3 days in a row",
                    15,
                    Criterion::at_least(STREAK, 3.0),
                ),
                AchievementDefinition::new(
                    "streak-7",
                    "Week Warrior",
                    "Stay active 7 days in a row",
                    50,
                    Criterion::at_least(STREAK, 7.0),
                ),
                AchievementDefinition::new(
                    "streak-30",
                    "Unstoppable",
                    "Stay active 30 days in a row",
                    200,
                    Criterion::at_least(STREAK, 30.0),
                ),
                AchievementDefinition::new(
                    "level-5",
                    "Rising Star",
                    "Reach level 5",
                    50,
                    Criterion::at_least(LEVEL, 5.0),
                ),
                AchievementDefinition::new(
                    "level-10",
                    "Veteran",
                    "Reach level 10",
                    100,
                    Criterion::at_least(LEVEL, 10.0),
                ),
                AchievementDefinition::new(
                    "all-rounder",
                    "All-Rounder",
                    "Complete a task, add a contact and log a meeting",
                    30,
                    Criterion::All(vec![
                        Criterion::at_least(COMPLETED_TASKS, 1.0),
                        Criterion::at_least(CONTACTS_ADDED, 1.0),
                        Criterion::at_least(MEETINGS_LOGGED, 1.0),
                    ]),
                ),
            ],
        }
    }

    /// Built-in catalog of workspace (team) achievements
    pub fn team_defaults() -> Self {
        use counters::*;
        Self {
            achievements: vec![
                AchievementDefinition::new(
                    "team-first-task",
                    "Kickoff",
                    "The team completed its first task",
                    50,
                    Criterion::at_least(COMPLETED_TASKS, 1.0),
                ),
                AchievementDefinition::new(
                    "team-tasks-100",
                    "Well Oiled",
                    "The team completed 100 tasks",
                    250,
                    Criterion::at_least(COMPLETED_TASKS, 100.0),
                ),
                AchievementDefinition::new(
                    "team-tasks-1000",
                    "Machine",
                    "The team completed 1,000 tasks",
                    1_000,
                    Criterion::at_least(COMPLETED_TASKS, 1_000.0),
                ),
                AchievementDefinition::new(
                    "team-of-5",
                    "Squad",
                    "Grow the workspace to 5 members",
                    100,
                    Criterion::at_least(MEMBER_COUNT, 5.0),
                ),
                AchievementDefinition::new(
                    "team-of-20",
                    "Company",
                    "Grow the workspace to 20 members",
                    400,
                    Criterion::at_least(MEMBER_COUNT, 20.0),
                ),
                AchievementDefinition::new(
                    "team-first-meeting",
                    "First Huddle",
                    "The team logged its first meeting",
                    50,
                    Criterion::at_least(MEETINGS_LOGGED, 1.0),
                ),
                AchievementDefinition::new(
                    "team-meetings-50",
                    "Always Talking",
                    "The team logged 50 meetings",
                    300,
                    Criterion::at_least(MEETINGS_LOGGED, 50.0),
                ),
                AchievementDefinition::new(
                    "team-first-contact",
                    "Open for Business",
                    "The team added its first contact",
                    50,
                    Criterion::at_least(CONTACTS_ADDED, 1.0),
                ),
                AchievementDefinition::new(
                    "team-contacts-500",
                    "Well Connected",
                    "The team added 500 contacts",
                    500,
                    Criterion::at_least(CONTACTS_ADDED, 500.0),
                ),
                AchievementDefinition::new(
                    "team-first-revenue",
                    "First Dollar",
                    "The team logged its first revenue",
                    100,
                    Criterion::at_least(TOTAL_GMV, 0.01),
                ),
                AchievementDefinition::new(
                    "team-gmv-10k",
                    "Five Figures",
                    "The team passed 10,000 in GMV",
                    500,
                    Criterion::at_least(TOTAL_GMV, 10_000.0),
                ),
                AchievementDefinition::new(
                    "team-gmv-100k",
                    "Six Figures",
                    "The team passed 100,000 in GMV",
                    2_000,
                    Criterion::at_least(TOTAL_GMV, 100_000.0),
                ),
                AchievementDefinition::new(
                    "team-docs-25",
                    "Knowledge Base",
                    "The team created 25 documents",
                    200,
                    Criterion::at_least(DOCUMENTS_CREATED, 25.0),
                ),
            ],
        }
    }
}
