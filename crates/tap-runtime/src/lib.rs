#![deny(warnings)]

//! Runtime for the tap economy.
//!
//! [`EconomyService`] is the command surface: login, taps, upgrades,
//! passive income and referrals. Each command runs the rules from
//! `tap_econ` against one record inside a store transaction, so a failed
//! command never leaves partial state behind. Cross-user referral credits go
//! through [`ReferralLedger`], which commits both players together.

pub mod codegen;
pub mod referral;
pub mod service;

pub use codegen::{CodeGenerator, CODE_ALPHABET};
pub use referral::{ReferralInfo, ReferralLedger};
pub use service::{EconomyService, TapResult};
