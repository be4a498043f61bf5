//! Achievement evaluation
//!
//! Evaluation is a set union: it only ever reports achievements that are
//! newly satisfied and not yet unlocked, in catalog declaration order.

use std::collections::HashSet;

use crate::catalog::{AchievementDefinition, AchievementId, Catalog};
use crate::context::ContextSnapshot;

/// Return the definitions that should be unlocked now.
///
/// `already_unlocked` is never modified; calling again with the union of
/// `already_unlocked` and the result (and the same snapshot) returns nothing.
pub fn evaluate<'c, I, S>(
    catalog: &'c Catalog,
    already_unlocked: I,
    snapshot: &ContextSnapshot,
) -> Vec<&'c AchievementDefinition>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let unlocked: HashSet<String> = already_unlocked
        .into_iter()
        .map(|id| id.as_ref().to_string())
        .collect();

    catalog
        .iter()
        .filter(|def| !unlocked.contains(&def.id))
        .filter(|def| def.criterion.matches(snapshot))
        .collect()
}

/// Convenience wrapper returning only ids
pub fn evaluate_ids<I, S>(
    catalog: &Catalog,
    already_unlocked: I,
    snapshot: &ContextSnapshot,
) -> Vec<AchievementId>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    evaluate(catalog, already_unlocked, snapshot)
        .into_iter()
        .map(|def| def.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::counters;

    #[test]
    fn test_catalog_order_preserved() {
        let catalog = Catalog::user_defaults();
        let snapshot = ContextSnapshot::new()
            .with(counters::CONTACTS_ADDED, 1.0)
            .with(counters::COMPLETED_TASKS, 10.0);

        let ids = evaluate_ids(&catalog, Vec::<String>::new(), &snapshot);
        assert_eq!(ids, vec!["first-task", "task-10", "first-contact"]);
    }

    #[test]
    fn test_already_unlocked_skipped() {
        let catalog = Catalog::user_defaults();
        let snapshot = ContextSnapshot::new().with(counters::COMPLETED_TASKS, 10.0);

        let ids = evaluate_ids(&catalog, ["first-task"], &snapshot);
        assert_eq!(ids, vec!["task-10"]);
    }

    #[test]
    fn test_idempotent() {
        let catalog = Catalog::team_defaults();
        let snapshot = ContextSnapshot::new()
            .with(counters::COMPLETED_TASKS, 150.0)
            .with(counters::MEMBER_COUNT, 6.0)
            .with(counters::TOTAL_GMV, 12_000.0);

        let mut baseline = vec!["team-first-task".to_string()];
        let first = evaluate_ids(&catalog, &baseline, &snapshot);
        assert!(!first.is_empty());

        baseline.extend(first);
        assert!(evaluate_ids(&catalog, &baseline, &snapshot).is_empty());
    }

    #[test]
    fn test_empty_snapshot_unlocks_nothing() {
        let catalog = Catalog::user_defaults();
        assert!(evaluate_ids(&catalog, Vec::<String>::new(), &ContextSnapshot::new()).is_empty());
    }
}
