//! Error taxonomy shared by every economy operation.

use crate::UserId;
use thiserror::Error;

/// Coarse failure classes surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    InsufficientFunds,
    Conflict,
    Internal,
}

/// Errors produced by economy commands.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EconomyError {
    /// No economy state exists for the user.
    #[error("user not found: {0}")]
    UserNotFound(UserId),
    /// Referral code does not resolve to any player.
    #[error("invalid referral code: {0}")]
    InvalidCode(String),
    /// Upgrade track name is not recognised.
    #[error("unknown upgrade type: {0}")]
    UnknownUpgradeType(String),
    /// Tap requests must carry a positive count.
    #[error("tap count must be positive, got {0}")]
    NonPositiveTaps(i64),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Not enough points for a purchase.
    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds { required: u64, available: u64 },
    /// A player tried to redeem their own code.
    #[error("cannot refer yourself")]
    SelfReferral,
    /// The invited player already has a referrer.
    #[error("user {0} has already been referred")]
    AlreadyReferred(UserId),
    /// The referrer's ledger already holds an entry for this friend.
    #[error("referral of user {0} already claimed")]
    DuplicateClaim(UserId),
    /// Backing store rejected the call.
    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),
    /// A stored record could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(String),
    /// No unused referral code found within the attempt budget.
    #[error("no unique referral code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: u32 },
    /// Arithmetic overflow in an economic calculation.
    #[error("arithmetic overflow in economic calculation")]
    Overflow,
}

impl EconomyError {
    /// Failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EconomyError::UserNotFound(_) | EconomyError::InvalidCode(_) => ErrorKind::NotFound,
            EconomyError::UnknownUpgradeType(_)
            | EconomyError::NonPositiveTaps(_)
            | EconomyError::InvalidConfig(_) => ErrorKind::InvalidArgument,
            EconomyError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            EconomyError::SelfReferral
            | EconomyError::AlreadyReferred(_)
            | EconomyError::DuplicateClaim(_) => ErrorKind::Conflict,
            EconomyError::StoreUnavailable(_)
            | EconomyError::Codec(_)
            | EconomyError::CodeSpaceExhausted { .. }
            | EconomyError::Overflow => ErrorKind::Internal,
        }
    }
}

/// Result type for economy operations.
pub type EconomyResult<T> = Result<T, EconomyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_taxonomy() {
        assert_eq!(EconomyError::UserNotFound(UserId(1)).kind(), ErrorKind::NotFound);
        assert_eq!(EconomyError::NonPositiveTaps(0).kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            EconomyError::InsufficientFunds { required: 2, available: 1 }.kind(),
            ErrorKind::InsufficientFunds
        );
        assert_eq!(EconomyError::SelfReferral.kind(), ErrorKind::Conflict);
        assert_eq!(
            EconomyError::CodeSpaceExhausted { attempts: 3 }.kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn messages_are_readable() {
        let e = EconomyError::InsufficientFunds { required: 1000, available: 10 };
        assert_eq!(e.to_string(), "insufficient funds: need 1000, have 10");
    }
}
