use std::ops::RangeInclusive;

use crate::consts::ADDRESS_PREFIX;
use crate::{Error, Result};

/// Returns the derivation path of the account with the given id, eg `44'/5741564'/0'/0'/7'`
pub fn derivation_path(id: u32) -> String {
    format!("{ADDRESS_PREFIX}{id}'")
}

/// Ids visited when fetching `limit` accounts after `from`, both ends included
pub(crate) fn account_ids(from: u32, limit: u32) -> Result<RangeInclusive<u32>> {
    let last = from
        .checked_add(limit)
        .ok_or(Error::AccountRangeOverflow { from, limit })?;
    Ok(from..=last)
}
