//! Tap conversion: regenerate, price, clamp, apply.

use crate::regen::{regen, regen_rate};
use tap_core::{EconomyConfig, EconomyError, EconomyResult, TapValueTier, UserEconomyState};

/// Base points per tap for `level`.
///
/// Uses the highest tier at or below `level`; levels below the first tier use
/// the first tier. `tiers` must be ordered by level and non-empty (see
/// `validate_config`); an empty table yields 1.
pub fn base_tap_value(tiers: &[TapValueTier], level: u32) -> u64 {
    tiers
        .iter()
        .rev()
        .find(|t| t.level <= level)
        .or_else(|| tiers.first())
        .map_or(1, |t| t.value)
}

/// Points granted (and energy spent) per tap.
pub fn tap_yield(tiers: &[TapValueTier], state: &UserEconomyState) -> u64 {
    base_tap_value(tiers, state.level)
        .saturating_add(u64::from(state.multitap_level.saturating_sub(1)))
}

/// What a tap request actually did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TapOutcome {
    /// Taps credited; less than requested when energy ran out.
    pub actual_taps: u64,
    pub points_gained: u64,
    pub energy_spent: u64,
    /// Energy available after regeneration, before paying for taps.
    pub energy_available: u64,
}

impl TapOutcome {
    /// True when the request was clamped by the energy budget.
    pub fn truncated(&self, requested: u64) -> bool {
        self.actual_taps < requested
    }
}

/// Convert a client-reported tap count into a bounded points/energy delta.
///
/// Regeneration up to `now` is credited before any tap is paid for, then the
/// request is clamped to what the regenerated energy can afford. Energy never
/// goes negative and the client can never be credited more taps than it could
/// have paid for. On error the state is untouched.
pub fn process_tap(
    state: &mut UserEconomyState,
    requested: i64,
    now: i64,
    cfg: &EconomyConfig,
) -> EconomyResult<TapOutcome> {
    let n = match u64::try_from(requested) {
        Ok(n) if n > 0 => n,
        _ => return Err(EconomyError::NonPositiveTaps(requested)),
    };

    let available = regen(
        state.energy,
        state.max_energy,
        now.saturating_sub(state.last_sync_time),
        regen_rate(state.recharge_speed_level),
    );
    let per_tap_yield = tap_yield(&cfg.tap_values, state);
    let per_tap_cost = per_tap_yield;
    let affordable = if per_tap_cost > 0 {
        available / per_tap_cost
    } else {
        n
    };
    let actual_taps = n.min(affordable);
    // actual_taps * per_tap_cost <= available, so neither product overflows
    let energy_spent = actual_taps * per_tap_cost;
    let points_gained = actual_taps * per_tap_yield;
    let points = state
        .points
        .checked_add(points_gained)
        .ok_or(EconomyError::Overflow)?;

    state.energy = available - energy_spent;
    state.points = points;
    state.last_sync_time = state.last_sync_time.max(now);
    Ok(TapOutcome {
        actual_taps,
        points_gained,
        energy_spent,
        energy_available: available,
    })
}
