//! Referral codes and the cross-user bonus ledger.

use crate::codegen::CodeGenerator;
use persistence::StateStore;
use serde::Serialize;
use std::sync::Arc;
use tap_core::{
    Clock, EconomyConfig, EconomyError, EconomyResult, FriendLedgerEntry, Profile,
    ReferralRecord, UserEconomyState, UserId, UserRecord,
};
use tracing::{debug, info, warn};

/// First name recorded when a referral record is created without a profile.
pub const FALLBACK_FIRST_NAME: &str = "User";

/// Referral overview returned to a player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReferralInfo {
    pub code: String,
    pub link: String,
    /// Newest first.
    pub friends: Vec<FriendLedgerEntry>,
    pub friends_count: u64,
    pub total_earned: u64,
}

/// Owns referral codes and applies invitation bonuses.
pub struct ReferralLedger<S: StateStore> {
    store: Arc<S>,
    cfg: Arc<EconomyConfig>,
    clock: Arc<dyn Clock>,
    codes: CodeGenerator,
}

fn referral_vanished(user: UserId) -> EconomyError {
    EconomyError::StoreUnavailable(format!("referral record of {user} disappeared"))
}

impl<S: StateStore> ReferralLedger<S> {
    pub fn new(
        store: Arc<S>,
        cfg: Arc<EconomyConfig>,
        clock: Arc<dyn Clock>,
        codes: CodeGenerator,
    ) -> Self {
        Self {
            store,
            cfg,
            clock,
            codes,
        }
    }

    /// Draw a code and claim it for `owner` in the global index.
    ///
    /// Gives up after `max_code_attempts` collisions instead of looping.
    pub fn generate_code(&self, owner: UserId) -> EconomyResult<String> {
        let attempts = self.cfg.max_code_attempts;
        for attempt in 1..=attempts {
            let code = self.codes.draw();
            if self.store.reserve_code(&code, owner)? {
                return Ok(code);
            }
            debug!(%owner, attempt, "referral code collision");
        }
        Err(EconomyError::CodeSpaceExhausted { attempts })
    }

    /// A reserved code if `user` has no referral record yet.
    fn code_if_missing(
        &self,
        record: Option<&UserRecord>,
        user: UserId,
    ) -> EconomyResult<Option<String>> {
        match record.and_then(|rec| rec.referral.as_ref()) {
            Some(_) => Ok(None),
            None => self.generate_code(user).map(Some),
        }
    }

    /// Give back a reserved code that did not end up in a committed record.
    fn settle_reservation(&self, user: UserId, code: Option<String>, committed: bool) {
        let Some(code) = code else { return };
        if committed {
            return;
        }
        if let Err(e) = self.store.release_code(&code, user) {
            warn!(%user, code = %code, error = %e, "could not release referral code");
        }
    }

    /// Run `f` on the user's record with its referral record in place, all
    /// in one commit.
    ///
    /// The code for a new record is reserved before the transaction and
    /// released again when the commit fails or the record already existed.
    pub fn transact_with_referral<T, F>(
        &self,
        user: UserId,
        profile: Profile,
        f: F,
    ) -> EconomyResult<T>
    where
        F: FnOnce(&mut UserRecord) -> EconomyResult<T>,
    {
        let fresh = self.code_if_missing(self.store.read(user)?.as_ref(), user)?;
        let mut used = false;
        let result = self.store.transact(user, |rec| {
            if rec.referral.is_none() {
                let code = fresh.clone().ok_or_else(|| referral_vanished(user))?;
                rec.referral = Some(ReferralRecord::new(code, profile));
                used = true;
            }
            f(rec)
        });
        self.settle_reservation(user, fresh, used && result.is_ok());
        result
    }

    /// Create the player's referral record if it does not exist yet.
    pub fn initialize(&self, user: UserId, profile: Profile) -> EconomyResult<ReferralRecord> {
        self.transact_with_referral(user, profile, |rec| {
            rec.referral.clone().ok_or_else(|| referral_vanished(user))
        })
    }

    /// Invitation link for a code.
    pub fn link_for(&self, code: &str) -> String {
        format!("https://t.me/{}?start={}", self.cfg.bot_username, code)
    }

    pub fn referral_link(&self, user: UserId) -> EconomyResult<String> {
        let record = self.initialize(user, Profile::named(FALLBACK_FIRST_NAME))?;
        Ok(self.link_for(&record.referral_code))
    }

    /// Code, link and friends of a player, creating the record on first use.
    ///
    /// Everything is taken from one snapshot of the record.
    pub fn referral_info(&self, user: UserId) -> EconomyResult<ReferralInfo> {
        let rec = self.transact_with_referral(user, Profile::named(FALLBACK_FIRST_NAME), |rec| {
            Ok(rec.clone())
        })?;
        let referral = rec.referral.ok_or_else(|| referral_vanished(user))?;
        let mut friends: Vec<FriendLedgerEntry> = rec.friends.into_values().collect();
        friends.sort_by(|a, b| {
            b.joined_at
                .cmp(&a.joined_at)
                .then(a.user_id.cmp(&b.user_id))
        });
        Ok(ReferralInfo {
            link: self.link_for(&referral.referral_code),
            code: referral.referral_code,
            friends,
            friends_count: referral.friends_count,
            total_earned: referral.total_earned,
        })
    }

    /// Credit both sides of an invitation.
    ///
    /// All checks run before the bonus is applied. The new player's referral
    /// record and the five writes (referrer count, earnings, ledger entry and
    /// points; new player's `referred_by` and points) commit as one unit
    /// across both records.
    pub fn process_referral(
        &self,
        code: &str,
        new_user: UserId,
        profile: Profile,
    ) -> EconomyResult<()> {
        let referrer = self
            .store
            .lookup_code(code)?
            .ok_or_else(|| EconomyError::InvalidCode(code.to_string()))?;
        if referrer == new_user {
            return Err(EconomyError::SelfReferral);
        }
        let existing = self.store.read(new_user)?;
        let already = existing
            .as_ref()
            .and_then(|rec| rec.referral.as_ref())
            .is_some_and(|r| r.referred_by.is_some());
        if already {
            return Err(EconomyError::AlreadyReferred(new_user));
        }
        let fresh = self.code_if_missing(existing.as_ref(), new_user)?;

        let first_name = profile.first_name.clone();
        let now = self.clock.now();
        let bonus = self.cfg.referral_bonus;
        let mut used = false;
        let result = self.store.transact_pair(referrer, new_user, |referrer_rec, new_rec| {
            if new_rec.referral.is_none() {
                let fresh_code = fresh.clone().ok_or_else(|| referral_vanished(new_user))?;
                new_rec.referral = Some(ReferralRecord::new(fresh_code, profile));
                used = true;
            }
            let new_referral = new_rec
                .referral
                .as_mut()
                .ok_or_else(|| referral_vanished(new_user))?;
            if new_referral.referred_by.is_some() {
                return Err(EconomyError::AlreadyReferred(new_user));
            }
            if referrer_rec.friends.contains_key(&new_user) {
                return Err(EconomyError::DuplicateClaim(new_user));
            }
            let referrer_referral = referrer_rec
                .referral
                .as_mut()
                .ok_or_else(|| EconomyError::InvalidCode(code.to_string()))?;

            let referrer_state = referrer_rec
                .economy
                .get_or_insert_with(|| UserEconomyState::new(now));
            let new_state = new_rec
                .economy
                .get_or_insert_with(|| UserEconomyState::new(now));
            let referrer_points = referrer_state.points.checked_add(bonus);
            let new_points = new_state.points.checked_add(bonus);
            let total_earned = referrer_referral.total_earned.checked_add(bonus);
            let (Some(referrer_points), Some(new_points), Some(total_earned)) =
                (referrer_points, new_points, total_earned)
            else {
                return Err(EconomyError::Overflow);
            };

            referrer_referral.friends_count += 1;
            referrer_referral.total_earned = total_earned;
            referrer_rec.friends.insert(
                new_user,
                FriendLedgerEntry {
                    user_id: new_user,
                    first_name,
                    earned: bonus,
                    joined_at: now,
                },
            );
            referrer_state.points = referrer_points;
            new_referral.referred_by = Some(code.to_string());
            new_state.points = new_points;
            Ok(())
        });
        self.settle_reservation(new_user, fresh, used && result.is_ok());
        result?;
        info!(%referrer, %new_user, bonus, "referral credited");
        Ok(())
    }
}
