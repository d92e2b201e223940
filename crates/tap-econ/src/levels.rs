//! Level progress for display. Tap economics never read this table.

use serde::Serialize;
use tap_core::LevelTier;

/// Where a balance sits on the display ladder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LevelProgress {
    pub level: u32,
    pub name: String,
    /// Threshold of the next tier, `None` at the top.
    pub next_level_points: Option<u64>,
    /// Percent of the way to the next threshold, 0..=100.
    pub progress_pct: u8,
}

/// Display tier reached by `points`.
pub fn level_progress(tiers: &[LevelTier], points: u64) -> LevelProgress {
    let idx = tiers
        .iter()
        .rposition(|t| points >= t.min_points)
        .unwrap_or(0);
    let (level, name) = tiers
        .get(idx)
        .map_or((1, String::new()), |t| (t.level, t.name.clone()));
    let next_level_points = tiers.get(idx + 1).map(|t| t.min_points);
    let progress_pct = match next_level_points {
        Some(next) if next > 0 => (u128::from(points) * 100 / u128::from(next)).min(100) as u8,
        _ => 100,
    };
    LevelProgress {
        level,
        name,
        next_level_points,
        progress_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tap_core::EconomyConfig;

    #[test]
    fn ladder_positions() {
        let tiers = EconomyConfig::default().levels;
        let p = level_progress(&tiers, 0);
        assert_eq!((p.level, p.name.as_str()), (1, "Bronze"));
        assert_eq!(p.next_level_points, Some(100));
        assert_eq!(p.progress_pct, 0);

        let p = level_progress(&tiers, 750);
        assert_eq!(p.level, 3);
        assert_eq!(p.next_level_points, Some(1000));
        assert_eq!(p.progress_pct, 75);

        let p = level_progress(&tiers, 50_000);
        assert_eq!(p.name, "Grandmaster");
        assert_eq!(p.next_level_points, None);
        assert_eq!(p.progress_pct, 100);
    }
}
