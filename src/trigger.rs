//! Activity kinds that trigger team achievement checks

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::{counters, ContextSnapshot};

/// Kind of CRUD activity that fired a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKind {
    MemberAdded,
    TaskCompleted,
    MeetingLogged,
    ContactAdded,
    RevenueLogged,
    DocumentCreated,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 6] = [
        TriggerKind::MemberAdded,
        TriggerKind::TaskCompleted,
        TriggerKind::MeetingLogged,
        TriggerKind::ContactAdded,
        TriggerKind::RevenueLogged,
        TriggerKind::DocumentCreated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::MemberAdded => "memberAdded",
            TriggerKind::TaskCompleted => "taskCompleted",
            TriggerKind::MeetingLogged => "meetingLogged",
            TriggerKind::ContactAdded => "contactAdded",
            TriggerKind::RevenueLogged => "revenueLogged",
            TriggerKind::DocumentCreated => "documentCreated",
        }
    }

    /// Counter this trigger reports
    pub fn counter(&self) -> &'static str {
        match self {
            TriggerKind::MemberAdded => counters::MEMBER_COUNT,
            TriggerKind::TaskCompleted => counters::COMPLETED_TASKS,
            TriggerKind::MeetingLogged => counters::MEETINGS_LOGGED,
            TriggerKind::ContactAdded => counters::CONTACTS_ADDED,
            TriggerKind::RevenueLogged => counters::TOTAL_GMV,
            TriggerKind::DocumentCreated => counters::DOCUMENTS_CREATED,
        }
    }

    /// Partial snapshot carrying just this trigger's counter
    pub fn snapshot(&self, value: f64) -> ContextSnapshot {
        ContextSnapshot::new().with(self.counter(), value)
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_matches_as_str() {
        for kind in TriggerKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }

    #[test]
    fn test_snapshot_has_single_counter() {
        let snapshot = TriggerKind::TaskCompleted.snapshot(3.0);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(counters::COMPLETED_TASKS), Some(3.0));
    }
}
