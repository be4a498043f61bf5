//! Point-in-time activity counters supplied by callers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known counter names
pub mod counters {
    pub const COMPLETED_TASKS: &str = "completedTasks";
    pub const MEMBER_COUNT: &str = "memberCount";
    pub const MEETINGS_LOGGED: &str = "meetingsLogged";
    pub const CONTACTS_ADDED: &str = "contactsAdded";
    pub const TOTAL_GMV: &str = "totalGMV";
    pub const DOCUMENTS_CREATED: &str = "documentsCreated";

    /// Overlaid from user state before user-catalog evaluation
    pub const XP: &str = "xp";
    pub const LEVEL: &str = "level";
    pub const STREAK: &str = "streak";
}

/// Named counters assembled by the caller for one evaluation.
///
/// Not authoritative state: callers usually supply only the counters
/// relevant to the trigger that fired. Absent counters are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextSnapshot {
    counters: BTreeMap<String, f64>,
}

impl ContextSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style counter insert
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.counters.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.counters.get(name).copied()
    }

    /// Overlay `other` onto self; counters in `other` win.
    pub fn merge(&mut self, other: &ContextSnapshot) {
        for (name, value) in &other.counters {
            self.counters.insert(name.clone(), *value);
        }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for ContextSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self {
            counters: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
