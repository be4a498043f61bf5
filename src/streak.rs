//! Consecutive-day activity streaks

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Outcome of applying one day's activity to a streak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakUpdate {
    pub streak: u32,
    pub last_activity_date: Option<NaiveDate>,
    /// False when the call was a same-day (or backdated) no-op
    pub changed: bool,
}

/// Compute the next streak and last-activity day for activity on `today`.
///
/// A day earlier than `last_activity_date` (clock skew, backdated events)
/// leaves the streak untouched, same as a repeat on the same day.
pub fn next_streak(
    last_activity_date: Option<NaiveDate>,
    streak: u32,
    today: NaiveDate,
) -> StreakUpdate {
    let Some(last) = last_activity_date else {
        return StreakUpdate {
            streak: 1,
            last_activity_date: Some(today),
            changed: true,
        };
    };

    let gap = (today - last).num_days();
    let next = match gap {
        d if d <= 0 => {
            return StreakUpdate {
                streak,
                last_activity_date: Some(last),
                changed: false,
            }
        }
        1 => streak.saturating_add(1),
        _ => 1,
    };

    StreakUpdate {
        streak: next,
        last_activity_date: Some(today),
        changed: true,
    }
}

/// Streak as it should be displayed on `today`: a chain with a gap of more
/// than one day is already broken even though no activity has reset it yet.
pub fn effective_streak(
    last_activity_date: Option<NaiveDate>,
    streak: u32,
    today: NaiveDate,
) -> u32 {
    match last_activity_date {
        Some(last) if (today - last).num_days() <= 1 => streak,
        _ => 0,
    }
}
