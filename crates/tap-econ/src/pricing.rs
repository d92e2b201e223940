//! Upgrade price curves and purchases.

use tap_core::{
    EconomyConfig, EconomyError, EconomyResult, UpgradeCurve, UpgradeKind, UserEconomyState,
};
use tracing::debug;

/// Price of the next level of a track currently at `level`.
///
/// `floor(base_cost * level^coeff)`. Level 0 (the tap bot before its first
/// purchase) is priced as level 1.
///
/// Example:
/// let c = UpgradeCurve { base_cost: 1000, coeff: 2.0 };
/// assert_eq!(upgrade_cost(c, 3).unwrap(), 9000);
pub fn upgrade_cost(curve: UpgradeCurve, level: u32) -> EconomyResult<u64> {
    let l = f64::from(level.max(1));
    let raw = curve.base_cost as f64 * l.powf(curve.coeff);
    if !raw.is_finite() || raw < 0.0 || raw >= u64::MAX as f64 {
        return Err(EconomyError::Overflow);
    }
    Ok(raw.floor() as u64)
}

/// Energy cap at an energy-limit level.
pub fn max_energy_for(energy_limit_level: u32, cfg: &EconomyConfig) -> u64 {
    let extra = u64::from(energy_limit_level.saturating_sub(1));
    cfg.base_max_energy
        .saturating_add(extra.saturating_mul(cfg.max_energy_step))
}

/// Result of a successful purchase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpgradeReceipt {
    pub kind: UpgradeKind,
    pub cost: u64,
    pub new_level: u32,
}

/// Buy one level of `kind`: debit exactly the price and raise the track by one.
///
/// Buying `energy_limit` recomputes the cap but does not refill energy.
/// On error the state is untouched.
pub fn apply_upgrade(
    state: &mut UserEconomyState,
    kind: UpgradeKind,
    cfg: &EconomyConfig,
) -> EconomyResult<UpgradeReceipt> {
    let level = state.track_level(kind);
    let cost = upgrade_cost(cfg.upgrades.curve(kind), level)?;
    if state.points < cost {
        return Err(EconomyError::InsufficientFunds {
            required: cost,
            available: state.points,
        });
    }
    let new_level = level.checked_add(1).ok_or(EconomyError::Overflow)?;

    state.points -= cost;
    *state.track_level_mut(kind) = new_level;
    if kind == UpgradeKind::EnergyLimit {
        state.max_energy = max_energy_for(new_level, cfg);
    }
    debug!(%kind, cost, new_level, "upgrade applied");
    Ok(UpgradeReceipt {
        kind,
        cost,
        new_level,
    })
}
