#![deny(warnings)]

//! Economic rules of the tap game.
//!
//! Everything here is a pure function over [`tap_core::UserEconomyState`]:
//! - Energy regeneration over elapsed time
//! - Upgrade price curves and purchases
//! - The clamped tap conversion (energy into points)
//! - Capped offline passive income
//! - Level progress for display
//!
//! Callers run these against a private copy of the state and commit the copy
//! only when the function returns `Ok`.

pub mod levels;
pub mod passive;
pub mod pricing;
pub mod regen;
pub mod tap;

pub use levels::{level_progress, LevelProgress};
pub use passive::{apply_mining_upgrade, passive_earned, settle_passive, PassiveSettlement};
pub use pricing::{apply_upgrade, max_energy_for, upgrade_cost, UpgradeReceipt};
pub use regen::{regen, regen_rate, settle_energy};
pub use tap::{base_tap_value, process_tap, tap_yield, TapOutcome};
