//! Time-based energy regeneration.

use tap_core::UserEconomyState;

/// Energy restored per second at a recharge-speed level: one at level 1,
/// plus one for every level above it.
pub fn regen_rate(recharge_speed_level: u32) -> u64 {
    1 + u64::from(recharge_speed_level.saturating_sub(1))
}

/// Energy after `elapsed` seconds at `rate` per second, capped at `max_energy`.
///
/// Negative `elapsed` (clock skew) restores nothing.
///
/// Example:
/// assert_eq!(regen(500, 1000, 10, 1), 510);
/// assert_eq!(regen(990, 1000, 60, 1), 1000);
pub fn regen(energy: u64, max_energy: u64, elapsed: i64, rate: u64) -> u64 {
    let elapsed = u64::try_from(elapsed).unwrap_or(0);
    energy
        .saturating_add(elapsed.saturating_mul(rate))
        .min(max_energy)
}

/// Credit regeneration up to `now` and restart the energy clock.
///
/// The clock never moves backwards, so a skewed `now` cannot re-open a window
/// that was already credited.
pub fn settle_energy(state: &mut UserEconomyState, now: i64) -> u64 {
    let rate = regen_rate(state.recharge_speed_level);
    state.energy = regen(
        state.energy,
        state.max_energy,
        now.saturating_sub(state.last_sync_time),
        rate,
    );
    state.last_sync_time = state.last_sync_time.max(now);
    state.energy
}
