//! Level arithmetic for users and teams.
//!
//! User levels use a generated threshold curve; team levels use a fixed
//! table. Both are pure and never return a level below 1.

use serde::{Deserialize, Serialize};

/// Minimum total XP required for each team level (index 0 = level 1).
pub const TEAM_LEVEL_THRESHOLDS: [u64; 10] = [
    0,      // 1
    500,    // 2
    1_500,  // 3
    3_000,  // 4
    5_000,  // 5
    8_000,  // 6
    12_000, // 7
    18_000, // 8
    30_000, // 9
    50_000, // 10
];

/// XP needed to advance from `level` to `level + 1`.
pub fn level_threshold(level: u32) -> u64 {
    let l = u64::from(level);
    100 * l + 50 * l * l
}

/// Sum of thresholds for levels `1..=level`, i.e. the total XP at which
/// a user reaches `level + 1`.
pub fn cumulative_threshold(level: u32) -> u64 {
    (1..=level).map(level_threshold).fold(0u64, u64::saturating_add)
}

/// Where a user sits within their current level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub level: u32,
    /// XP earned since reaching `level`
    pub xp_into_level: u64,
    /// XP required to advance from `level`
    pub xp_for_next_level: u64,
}

/// Walk the threshold curve and report the level plus the remainder.
pub fn level_progress(xp: u64) -> LevelProgress {
    let mut level: u32 = 1;
    let mut remaining = xp;

    // Thresholds grow strictly with level, so this terminates for any finite xp.
    while remaining >= level_threshold(level) {
        remaining -= level_threshold(level);
        level += 1;
    }

    LevelProgress {
        level,
        xp_into_level: remaining,
        xp_for_next_level: level_threshold(level),
    }
}

/// Level for an individual user's total XP.
pub fn calculate_level(xp: u64) -> u32 {
    level_progress(xp).level
}

/// Level for a workspace's total team XP.
pub fn calculate_team_level(total_xp: u64) -> u32 {
    TEAM_LEVEL_THRESHOLDS
        .iter()
        .rposition(|&threshold| total_xp >= threshold)
        .map(|idx| idx as u32 + 1)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_xp_is_level_one() {
        assert_eq!(calculate_level(0), 1);
        assert_eq!(calculate_team_level(0), 1);
    }

    #[test]
    fn test_threshold_curve() {
        assert_eq!(level_threshold(1), 150);
        assert_eq!(level_threshold(2), 400);
        assert_eq!(level_threshold(3), 750);
    }

    #[test]
    fn test_level_boundaries() {
        assert_eq!(calculate_level(149), 1);
        assert_eq!(calculate_level(150), 2);
        assert_eq!(calculate_level(549), 2);
        assert_eq!(calculate_level(550), 3);
    }

    #[test]
    fn test_cumulative_threshold_reaches_next_level() {
        for level in 1..=40 {
            assert_eq!(calculate_level(cumulative_threshold(level)), level + 1);
            assert_eq!(calculate_level(cumulative_threshold(level) - 1), level);
        }
    }

    #[test]
    fn test_level_is_monotonic() {
        let mut previous = calculate_level(0);
        for xp in (0..20_000).step_by(7) {
            let level = calculate_level(xp);
            assert!(level >= previous);
            previous = level;
        }
    }

    #[test]
    fn test_level_progress_remainder() {
        let progress = level_progress(200);
        assert_eq!(progress.level, 2);
        assert_eq!(progress.xp_into_level, 50);
        assert_eq!(progress.xp_for_next_level, 400);
    }

    #[test]
    fn test_huge_xp_terminates() {
        assert!(calculate_level(u64::MAX / 4) > 1);
    }

    #[test]
    fn test_team_levels() {
        assert_eq!(calculate_team_level(499), 1);
        assert_eq!(calculate_team_level(500), 2);
        assert_eq!(calculate_team_level(49_999), 9);
        assert_eq!(calculate_team_level(50_000), 10);
        assert_eq!(calculate_team_level(u64::MAX), 10);
    }

    #[test]
    fn test_team_thresholds_increase() {
        assert!(TEAM_LEVEL_THRESHOLDS.windows(2).all(|w| w[0] < w[1]));
    }
}
