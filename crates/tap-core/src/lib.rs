#![deny(warnings)]

//! Core domain records and invariants for the tap economy.
//!
//! This crate defines the typed per-player records shared by the math,
//! runtime and persistence crates, together with validation helpers that
//! guard the basic invariants of each record.

pub mod clock;
pub mod config;
pub mod error;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    validate_config, EconomyConfig, LevelTier, SyncConfig, TapValueTier, UpgradeCurve,
    UpgradeTable,
};
pub use error::{EconomyError, EconomyResult, ErrorKind};

/// Unique identifier of a player (the messenger account id).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Energy a fresh account starts with, which is also its first cap.
pub const STARTING_ENERGY: u64 = 1000;

/// Per-player economy state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEconomyState {
    /// Spendable currency.
    pub points: u64,
    /// Current energy, never above `max_energy`.
    pub energy: u64,
    /// Energy cap, driven by the energy-limit track.
    pub max_energy: u64,
    /// Progression level; the authoritative key for the per-tap base value.
    pub level: u32,
    /// Multitap track (>= 1).
    pub multitap_level: u32,
    /// Energy-limit track (>= 1).
    pub energy_limit_level: u32,
    /// Recharge-speed track (>= 1).
    pub recharge_speed_level: u32,
    /// Tap-bot track (>= 0).
    pub tap_bot_level: u32,
    /// Passive production rate.
    pub profit_per_hour: u64,
    /// Unix seconds of the last energy settlement (tap or login).
    pub last_sync_time: i64,
    /// Unix seconds of the last passive-income settlement.
    pub last_passive_sync: i64,
}

impl UserEconomyState {
    /// State of a player on first login: full energy, no points, level-1 tracks.
    pub fn new(now: i64) -> Self {
        Self {
            points: 0,
            energy: STARTING_ENERGY,
            max_energy: STARTING_ENERGY,
            level: 1,
            multitap_level: 1,
            energy_limit_level: 1,
            recharge_speed_level: 1,
            tap_bot_level: 0,
            profit_per_hour: 0,
            last_sync_time: now,
            last_passive_sync: now,
        }
    }

    /// Current level of an upgrade track.
    pub fn track_level(&self, kind: UpgradeKind) -> u32 {
        match kind {
            UpgradeKind::Multitap => self.multitap_level,
            UpgradeKind::EnergyLimit => self.energy_limit_level,
            UpgradeKind::RechargeSpeed => self.recharge_speed_level,
            UpgradeKind::TapBot => self.tap_bot_level,
        }
    }

    /// Mutable access to an upgrade track.
    pub fn track_level_mut(&mut self, kind: UpgradeKind) -> &mut u32 {
        match kind {
            UpgradeKind::Multitap => &mut self.multitap_level,
            UpgradeKind::EnergyLimit => &mut self.energy_limit_level,
            UpgradeKind::RechargeSpeed => &mut self.recharge_speed_level,
            UpgradeKind::TapBot => &mut self.tap_bot_level,
        }
    }
}

/// Purchasable upgrade tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeKind {
    /// Adds one point (and one energy of cost) per tap per level.
    Multitap,
    /// Raises the energy cap.
    EnergyLimit,
    /// Raises the energy regeneration rate.
    RechargeSpeed,
    /// Automated tapping; level starts at zero.
    TapBot,
}

impl UpgradeKind {
    /// All tracks in display order.
    pub const ALL: [UpgradeKind; 4] = [
        UpgradeKind::Multitap,
        UpgradeKind::EnergyLimit,
        UpgradeKind::RechargeSpeed,
        UpgradeKind::TapBot,
    ];

    /// Wire name of the track.
    pub fn as_str(self) -> &'static str {
        match self {
            UpgradeKind::Multitap => "multitap",
            UpgradeKind::EnergyLimit => "energy_limit",
            UpgradeKind::RechargeSpeed => "recharge_speed",
            UpgradeKind::TapBot => "tap_bot",
        }
    }
}

impl fmt::Display for UpgradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpgradeKind {
    type Err = EconomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpgradeKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| EconomyError::UnknownUpgradeType(s.to_string()))
    }
}

/// Caller-supplied display identity of a player.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl Profile {
    /// Profile with only a first name.
    pub fn named(first_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            ..Self::default()
        }
    }
}

/// Referral bookkeeping of a single player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralRecord {
    /// Invitation code owned by this player; immutable once generated.
    pub referral_code: String,
    /// Code of the player who invited this one; written at most once.
    pub referred_by: Option<String>,
    /// Number of friends this player has invited.
    pub friends_count: u64,
    /// Bonus points earned through invitations.
    pub total_earned: u64,
    pub profile: Profile,
}

impl ReferralRecord {
    pub fn new(referral_code: String, profile: Profile) -> Self {
        Self {
            referral_code,
            referred_by: None,
            friends_count: 0,
            total_earned: 0,
            profile,
        }
    }
}

/// One invited friend in a referrer's append-only ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendLedgerEntry {
    pub user_id: UserId,
    pub first_name: String,
    /// Bonus credited to the referrer for this friend.
    pub earned: u64,
    /// Unix seconds when the friend joined.
    pub joined_at: i64,
}

/// Everything the store keeps under one user key; the unit of atomic commit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub economy: Option<UserEconomyState>,
    pub referral: Option<ReferralRecord>,
    /// Invited friends keyed by their id.
    pub friends: BTreeMap<UserId, FriendLedgerEntry>,
}

/// Validation errors for record invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Energy above its cap.
    #[error("energy {energy} exceeds max energy {max_energy}")]
    EnergyAboveCap { energy: u64, max_energy: u64 },
    /// A level-style field that must be at least 1 is zero.
    #[error("{0} must be >= 1")]
    ZeroLevel(&'static str),
    /// Referral code is empty.
    #[error("referral code must not be empty")]
    EmptyCode,
    /// Friend count and ledger disagree.
    #[error("friends_count {count} does not match ledger size {ledger}")]
    LedgerMismatch { count: u64, ledger: usize },
}

/// Validate an economy state.
pub fn validate_state(s: &UserEconomyState) -> Result<(), ValidationError> {
    if s.energy > s.max_energy {
        return Err(ValidationError::EnergyAboveCap {
            energy: s.energy,
            max_energy: s.max_energy,
        });
    }
    for (name, value) in [
        ("level", s.level),
        ("multitap_level", s.multitap_level),
        ("energy_limit_level", s.energy_limit_level),
        ("recharge_speed_level", s.recharge_speed_level),
    ] {
        if value == 0 {
            return Err(ValidationError::ZeroLevel(name));
        }
    }
    Ok(())
}

/// Validate a whole user record, including the referral ledger cross-check.
pub fn validate_record(r: &UserRecord) -> Result<(), ValidationError> {
    if let Some(state) = &r.economy {
        validate_state(state)?;
    }
    match &r.referral {
        Some(referral) => {
            if referral.referral_code.trim().is_empty() {
                return Err(ValidationError::EmptyCode);
            }
            if referral.friends_count != r.friends.len() as u64 {
                return Err(ValidationError::LedgerMismatch {
                    count: referral.friends_count,
                    ledger: r.friends.len(),
                });
            }
        }
        None if !r.friends.is_empty() => {
            return Err(ValidationError::LedgerMismatch {
                count: 0,
                ledger: r.friends.len(),
            });
        }
        None => {}
    }
    Ok(())
}
