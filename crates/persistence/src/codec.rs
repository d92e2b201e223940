//! Byte encoding of user records at the store boundary.
//!
//! Records are validated on the way in and on the way out, so a corrupted or
//! inconsistent record is reported instead of silently loaded.

use tap_core::{validate_record, EconomyError, EconomyResult, UserRecord};

pub fn encode(record: &UserRecord) -> EconomyResult<Vec<u8>> {
    validate_record(record).map_err(|e| EconomyError::Codec(e.to_string()))?;
    bincode::serialize(record).map_err(|e| EconomyError::Codec(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> EconomyResult<UserRecord> {
    let record: UserRecord =
        bincode::deserialize(bytes).map_err(|e| EconomyError::Codec(e.to_string()))?;
    validate_record(&record).map_err(|e| EconomyError::Codec(e.to_string()))?;
    Ok(record)
}
