//! Economy tuning tables and service settings.
//!
//! Every field has a default equal to the live game balance, so a YAML file
//! only needs to list the values it overrides.

use crate::error::{EconomyError, EconomyResult};
use crate::UpgradeKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Price curve of one upgrade track: `floor(base_cost * level^coeff)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpgradeCurve {
    pub base_cost: u64,
    pub coeff: f64,
}

/// Price curves for every track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeTable {
    pub multitap: UpgradeCurve,
    pub energy_limit: UpgradeCurve,
    pub recharge_speed: UpgradeCurve,
    pub tap_bot: UpgradeCurve,
}

impl Default for UpgradeTable {
    fn default() -> Self {
        Self {
            multitap: UpgradeCurve { base_cost: 1000, coeff: 2.0 },
            energy_limit: UpgradeCurve { base_cost: 500, coeff: 1.5 },
            recharge_speed: UpgradeCurve { base_cost: 2000, coeff: 2.5 },
            tap_bot: UpgradeCurve { base_cost: 10_000, coeff: 3.0 },
        }
    }
}

impl UpgradeTable {
    pub fn curve(&self, kind: UpgradeKind) -> UpgradeCurve {
        match kind {
            UpgradeKind::Multitap => self.multitap,
            UpgradeKind::EnergyLimit => self.energy_limit,
            UpgradeKind::RechargeSpeed => self.recharge_speed,
            UpgradeKind::TapBot => self.tap_bot,
        }
    }
}

/// Base points per tap at a given progression level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapValueTier {
    pub level: u32,
    pub value: u64,
}

/// Display-only level threshold shown to players.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelTier {
    pub level: u32,
    pub name: String,
    pub min_points: u64,
}

/// Batch flush settings for the durable sync worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Max dirty users drained per flush.
    pub batch_size: usize,
    /// Seconds between flushes.
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval_secs: 10,
        }
    }
}

/// Complete economy configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub upgrades: UpgradeTable,
    /// Tap economics, ordered by level. The single source of per-tap yield.
    pub tap_values: Vec<TapValueTier>,
    /// Level names and thresholds for progress display.
    pub levels: Vec<LevelTier>,
    /// Cap at energy-limit level 1.
    pub base_max_energy: u64,
    /// Cap increase per energy-limit level above 1.
    pub max_energy_step: u64,
    /// Longest offline window that still earns passive income.
    pub offline_cap_seconds: i64,
    /// Points credited to both sides of a referral.
    pub referral_bonus: u64,
    pub code_length: usize,
    /// Attempts before code generation gives up.
    pub max_code_attempts: u32,
    /// Bot handle used to build invitation links.
    pub bot_username: String,
    pub sync: SyncConfig,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        let tap_values = [(1, 1), (2, 2), (3, 3), (4, 4), (5, 5), (6, 10)]
            .into_iter()
            .map(|(level, value)| TapValueTier { level, value })
            .collect();
        let levels = [
            (1, "Bronze", 0),
            (2, "Silver", 100),
            (3, "Gold", 500),
            (4, "Platinum", 1000),
            (5, "Diamond", 5000),
            (6, "Grandmaster", 10_000),
        ]
        .into_iter()
        .map(|(level, name, min_points)| LevelTier {
            level,
            name: name.to_string(),
            min_points,
        })
        .collect();
        Self {
            upgrades: UpgradeTable::default(),
            tap_values,
            levels,
            base_max_energy: crate::STARTING_ENERGY,
            max_energy_step: 500,
            offline_cap_seconds: 3 * 3600,
            referral_bonus: 2500,
            code_length: 8,
            max_code_attempts: 16,
            bot_username: "YourBotName".to_string(),
            sync: SyncConfig::default(),
        }
    }
}

impl EconomyConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(text: &str) -> EconomyResult<Self> {
        let cfg: EconomyConfig =
            serde_yaml::from_str(text).map_err(|e| EconomyError::InvalidConfig(e.to_string()))?;
        validate_config(&cfg)?;
        Ok(cfg)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> EconomyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EconomyError::InvalidConfig(format!("{}: {e}", path.display())))?;
        let cfg = Self::from_yaml_str(&text)?;
        debug!(path = %path.display(), "loaded economy config");
        Ok(cfg)
    }
}

/// Check table ordering and value ranges.
pub fn validate_config(cfg: &EconomyConfig) -> EconomyResult<()> {
    let invalid = |msg: String| Err(EconomyError::InvalidConfig(msg));
    for kind in UpgradeKind::ALL {
        let curve = cfg.upgrades.curve(kind);
        if curve.base_cost == 0 {
            return invalid(format!("{kind}: base_cost must be > 0"));
        }
        if !curve.coeff.is_finite() || curve.coeff <= 0.0 {
            return invalid(format!("{kind}: coeff must be finite and > 0"));
        }
    }
    if cfg.tap_values.is_empty() {
        return invalid("tap_values must not be empty".into());
    }
    if cfg.tap_values.windows(2).any(|w| w[0].level >= w[1].level) {
        return invalid("tap_values must be strictly ordered by level".into());
    }
    match cfg.levels.first() {
        Some(first) if first.min_points == 0 => {}
        _ => return invalid("levels must start at 0 points".into()),
    }
    if cfg.levels.windows(2).any(|w| w[0].min_points >= w[1].min_points) {
        return invalid("levels must be strictly ordered by min_points".into());
    }
    if cfg.base_max_energy == 0 {
        return invalid("base_max_energy must be > 0".into());
    }
    if cfg.offline_cap_seconds < 0 {
        return invalid("offline_cap_seconds must be >= 0".into());
    }
    if cfg.code_length < 4 {
        return invalid("code_length must be >= 4".into());
    }
    if cfg.max_code_attempts == 0 {
        return invalid("max_code_attempts must be >= 1".into());
    }
    if cfg.bot_username.trim().is_empty() {
        return invalid("bot_username must not be empty".into());
    }
    if cfg.sync.batch_size == 0 || cfg.sync.interval_secs == 0 {
        return invalid("sync batch_size and interval_secs must be >= 1".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn defaults_are_valid() {
        let cfg = EconomyConfig::default();
        validate_config(&cfg).unwrap();
        assert_eq!(cfg.upgrades.curve(UpgradeKind::Multitap).base_cost, 1000);
        assert_eq!(cfg.offline_cap_seconds, 10_800);
        assert_eq!(cfg.tap_values.last().map(|t| t.value), Some(10));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg = EconomyConfig::from_yaml_str("referral_bonus: 100\nbot_username: TapBot\n").unwrap();
        assert_eq!(cfg.referral_bonus, 100);
        assert_eq!(cfg.bot_username, "TapBot");
        assert_eq!(cfg.base_max_energy, 1000);
        assert_eq!(cfg.sync.batch_size, 100);
    }

    #[test]
    fn unordered_tap_values_rejected() {
        let yaml = "tap_values:\n  - { level: 2, value: 2 }\n  - { level: 1, value: 1 }\n";
        let err = EconomyConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, EconomyError::InvalidConfig(_)));
    }

    #[test]
    fn zero_base_cost_rejected() {
        let mut cfg = EconomyConfig::default();
        cfg.upgrades.tap_bot.base_cost = 0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn shipped_config_loads() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../assets/economy.yaml");
        let cfg = EconomyConfig::from_yaml_file(&path).unwrap();
        assert_eq!(cfg.upgrades, UpgradeTable::default());
        assert_eq!(cfg.referral_bonus, 2500);
    }
}
