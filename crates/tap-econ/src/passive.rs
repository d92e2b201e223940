//! Passive income accrued from `profit_per_hour`, with an offline cap.

use serde::Serialize;
use tap_core::{EconomyError, EconomyResult, UserEconomyState};

const SECONDS_PER_HOUR: u128 = 3600;

/// Whole points earned at `profit_per_hour` over `elapsed` seconds, counting
/// at most `cap_seconds`. Negative `elapsed` earns nothing.
///
/// Example:
/// // ten hours offline at 3600/h only pays the three-hour cap
/// assert_eq!(passive_earned(3600, 36_000, 10_800), 10_800);
pub fn passive_earned(profit_per_hour: u64, elapsed: i64, cap_seconds: i64) -> u64 {
    let eligible = elapsed.clamp(0, cap_seconds.max(0)) as u128;
    let earned = u128::from(profit_per_hour) * eligible / SECONDS_PER_HOUR;
    u64::try_from(earned).unwrap_or(u64::MAX)
}

/// Result of a passive-income settlement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PassiveSettlement {
    pub earned: u64,
    /// Balance after crediting.
    pub points: u64,
    pub profit_per_hour: u64,
}

/// Credit income accrued since the last passive sync and restart its clock.
///
/// The clock always moves to `now` (never backwards), even when nothing was
/// earned, so repeated calls inside one window never pay twice.
pub fn settle_passive(
    state: &mut UserEconomyState,
    now: i64,
    cap_seconds: i64,
) -> EconomyResult<PassiveSettlement> {
    let earned = passive_earned(
        state.profit_per_hour,
        now.saturating_sub(state.last_passive_sync),
        cap_seconds,
    );
    let points = state
        .points
        .checked_add(earned)
        .ok_or(EconomyError::Overflow)?;
    state.points = points;
    state.last_passive_sync = state.last_passive_sync.max(now);
    Ok(PassiveSettlement {
        earned,
        points,
        profit_per_hour: state.profit_per_hour,
    })
}

/// Buy a production upgrade: settle at the old rate, pay, then raise the rate.
///
/// The three steps must stay in this order; settling after the rate change
/// would pay the whole pending window at the new rate. On error the state is
/// untouched, including the settlement.
pub fn apply_mining_upgrade(
    state: &mut UserEconomyState,
    cost: u64,
    profit_increase: u64,
    now: i64,
    cap_seconds: i64,
) -> EconomyResult<PassiveSettlement> {
    let mut next = state.clone();
    let settled = settle_passive(&mut next, now, cap_seconds)?;
    if next.points < cost {
        return Err(EconomyError::InsufficientFunds {
            required: cost,
            available: next.points,
        });
    }
    next.points -= cost;
    next.profit_per_hour = next
        .profit_per_hour
        .checked_add(profit_increase)
        .ok_or(EconomyError::Overflow)?;
    *state = next;
    Ok(settled)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: i64 = 3 * 3600;

    #[test]
    fn offline_cap_applies() {
        assert_eq!(passive_earned(3600, 10 * 3600, CAP), 10_800);
        assert_eq!(passive_earned(3600, 3600, CAP), 3600);
    }

    #[test]
    fn floors_fractional_income() {
        // 100/h for 60s = 1.66 points
        assert_eq!(passive_earned(100, 60, CAP), 1);
        assert_eq!(passive_earned(0, 1000, CAP), 0);
        assert_eq!(passive_earned(5000, -30, CAP), 0);
    }

    #[test]
    fn second_call_same_second_earns_nothing() {
        let mut s = UserEconomyState::new(0);
        s.profit_per_hour = 3600;
        let first = settle_passive(&mut s, 600, CAP).unwrap();
        assert_eq!(first.earned, 600);
        let second = settle_passive(&mut s, 600, CAP).unwrap();
        assert_eq!(second.earned, 0);
        assert_eq!(second.points, 600);
    }

    #[test]
    fn clock_advances_even_without_income() {
        let mut s = UserEconomyState::new(0);
        settle_passive(&mut s, 500, CAP).unwrap();
        assert_eq!(s.last_passive_sync, 500);
        assert_eq!(s.points, 0);
    }

    #[test]
    fn mining_upgrade_settles_at_old_rate_first() {
        let mut s = UserEconomyState::new(0);
        s.profit_per_hour = 3600;
        s.points = 1000;
        let settled = apply_mining_upgrade(&mut s, 1500, 7200, 3600, CAP).unwrap();
        assert_eq!(settled.earned, 3600);
        assert_eq!(s.points, 1000 + 3600 - 1500);
        assert_eq!(s.profit_per_hour, 10_800);
        assert_eq!(s.last_passive_sync, 3600);
    }

    #[test]
    fn mining_upgrade_counts_pending_income_toward_cost() {
        let mut s = UserEconomyState::new(0);
        s.profit_per_hour = 3600;
        apply_mining_upgrade(&mut s, 100, 1, 100, CAP).unwrap();
        assert_eq!(s.points, 0);
    }

    #[test]
    fn mining_upgrade_failure_is_all_or_nothing() {
        let mut s = UserEconomyState::new(0);
        s.profit_per_hour = 36;
        let before = s.clone();
        let err = apply_mining_upgrade(&mut s, 1_000_000, 10, 3600, CAP).unwrap_err();
        assert_eq!(
            err,
            EconomyError::InsufficientFunds {
                required: 1_000_000,
                available: 36
            }
        );
        assert_eq!(s, before);
    }
}
