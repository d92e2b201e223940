//! Command surface of the economy: every operation loads one record, runs
//! the pure rules from `tap_econ` on it and commits once.

use crate::codegen::CodeGenerator;
use crate::referral::{ReferralInfo, ReferralLedger};
use persistence::StateStore;
use serde::Serialize;
use std::sync::Arc;
use tap_core::{
    validate_config, Clock, EconomyConfig, EconomyError, EconomyResult, Profile, UpgradeKind,
    UserEconomyState, UserId,
};
use tap_econ::{LevelProgress, PassiveSettlement};
use tracing::{debug, info};

/// Outcome of a tap command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TapResult {
    pub state: UserEconomyState,
    pub actual_taps: u64,
    /// Fewer taps were credited than requested.
    pub truncated: bool,
}

pub struct EconomyService<S: StateStore> {
    store: Arc<S>,
    cfg: Arc<EconomyConfig>,
    clock: Arc<dyn Clock>,
    referrals: ReferralLedger<S>,
}

impl<S: StateStore> EconomyService<S> {
    /// Service drawing referral codes from OS entropy.
    pub fn new(store: Arc<S>, cfg: EconomyConfig, clock: Arc<dyn Clock>) -> EconomyResult<Self> {
        let codes = CodeGenerator::from_entropy(cfg.code_length);
        Self::build(store, cfg, clock, codes)
    }

    /// Service with a reproducible referral code sequence.
    pub fn with_code_seed(
        store: Arc<S>,
        cfg: EconomyConfig,
        clock: Arc<dyn Clock>,
        seed: u64,
    ) -> EconomyResult<Self> {
        let codes = CodeGenerator::seeded(cfg.code_length, seed);
        Self::build(store, cfg, clock, codes)
    }

    fn build(
        store: Arc<S>,
        cfg: EconomyConfig,
        clock: Arc<dyn Clock>,
        codes: CodeGenerator,
    ) -> EconomyResult<Self> {
        validate_config(&cfg)?;
        let cfg = Arc::new(cfg);
        let referrals =
            ReferralLedger::new(Arc::clone(&store), Arc::clone(&cfg), Arc::clone(&clock), codes);
        Ok(Self {
            store,
            cfg,
            clock,
            referrals,
        })
    }

    pub fn config(&self) -> &EconomyConfig {
        &self.cfg
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run `f` on the user's economy state inside one store transaction.
    fn apply<T, F>(&self, user: UserId, f: F) -> EconomyResult<(UserEconomyState, T)>
    where
        F: FnOnce(&mut UserEconomyState, i64) -> EconomyResult<T>,
    {
        let now = self.clock.now();
        self.store.transact(user, |rec| {
            let state = rec
                .economy
                .as_mut()
                .ok_or(EconomyError::UserNotFound(user))?;
            let out = f(state, now)?;
            Ok((state.clone(), out))
        })
    }

    /// Create the player on first sight, otherwise settle energy regeneration.
    ///
    /// The economy state and the referral record are written in one commit.
    pub fn login(&self, user: UserId, profile: Profile) -> EconomyResult<UserEconomyState> {
        let now = self.clock.now();
        let (state, created) =
            self.referrals
                .transact_with_referral(user, profile, |rec| match rec.economy.as_mut() {
                    Some(state) => {
                        tap_econ::settle_energy(state, now);
                        Ok((state.clone(), false))
                    }
                    None => {
                        let state = UserEconomyState::new(now);
                        rec.economy = Some(state.clone());
                        Ok((state, true))
                    }
                })?;
        if created {
            info!(user_id = %user, "player created");
        } else {
            debug!(user_id = %user, energy = state.energy, "login settled");
        }
        Ok(state)
    }

    /// Stored state, without settling anything.
    pub fn state(&self, user: UserId) -> EconomyResult<UserEconomyState> {
        self.store
            .read(user)?
            .and_then(|rec| rec.economy)
            .ok_or(EconomyError::UserNotFound(user))
    }

    pub fn tap(&self, user: UserId, taps: i64) -> EconomyResult<TapResult> {
        let (state, outcome) = self.apply(user, |state, now| {
            tap_econ::process_tap(state, taps, now, &self.cfg)
        })?;
        // taps > 0 here, process_tap rejects anything else
        let truncated = outcome.truncated(taps.unsigned_abs());
        debug!(
            user_id = %user,
            requested = taps,
            actual_taps = outcome.actual_taps,
            energy = state.energy,
            "tap processed"
        );
        Ok(TapResult {
            state,
            actual_taps: outcome.actual_taps,
            truncated,
        })
    }

    pub fn buy_upgrade(&self, user: UserId, kind: UpgradeKind) -> EconomyResult<UserEconomyState> {
        let (state, receipt) = self.apply(user, |state, _| {
            tap_econ::apply_upgrade(state, kind, &self.cfg)
        })?;
        info!(
            user_id = %user,
            upgrade = %receipt.kind,
            cost = receipt.cost,
            new_level = receipt.new_level,
            "upgrade bought"
        );
        Ok(state)
    }

    /// Price of the next level of `kind` for this player.
    pub fn quote_upgrade(&self, user: UserId, kind: UpgradeKind) -> EconomyResult<u64> {
        let state = self.state(user)?;
        tap_econ::upgrade_cost(self.cfg.upgrades.curve(kind), state.track_level(kind))
    }

    pub fn sync_passive(&self, user: UserId) -> EconomyResult<PassiveSettlement> {
        let cap = self.cfg.offline_cap_seconds;
        let (_, settled) = self.apply(user, |state, now| {
            tap_econ::settle_passive(state, now, cap)
        })?;
        debug!(user_id = %user, earned = settled.earned, "passive income settled");
        Ok(settled)
    }

    /// Settle passive income at the old rate, pay `cost`, raise the rate.
    pub fn buy_mining_upgrade(
        &self,
        user: UserId,
        cost: u64,
        profit_increase: u64,
    ) -> EconomyResult<UserEconomyState> {
        let cap = self.cfg.offline_cap_seconds;
        let (state, settled) = self.apply(user, |state, now| {
            tap_econ::apply_mining_upgrade(state, cost, profit_increase, now, cap)
        })?;
        info!(
            user_id = %user,
            cost,
            earned = settled.earned,
            profit_per_hour = state.profit_per_hour,
            "mining upgrade bought"
        );
        Ok(state)
    }

    /// Display tier of the player's current balance.
    pub fn level_progress(&self, user: UserId) -> EconomyResult<LevelProgress> {
        let state = self.state(user)?;
        Ok(tap_econ::level_progress(&self.cfg.levels, state.points))
    }

    pub fn referral_info(&self, user: UserId) -> EconomyResult<ReferralInfo> {
        self.referrals.referral_info(user)
    }

    pub fn referral_link(&self, user: UserId) -> EconomyResult<String> {
        self.referrals.referral_link(user)
    }

    pub fn process_referral(
        &self,
        code: &str,
        new_user: UserId,
        profile: Profile,
    ) -> EconomyResult<()> {
        self.referrals.process_referral(code, new_user, profile)
    }
}
