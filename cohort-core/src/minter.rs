//! Sequential identifier allocation below the reserved range.

use crate::error::ResolveError;
use crate::types::IdentityId;

/// Identifiers at or above this value are reserved for manually curated
/// records and never minted.
pub const DEFAULT_RESERVED_THRESHOLD: u64 = 900_000;

/// Next identifier after `high_water_mark`.
///
/// Fails rather than wrapping or entering the reserved range.
pub fn next_identity_id(
    high_water_mark: u64,
    reserved_threshold: u64,
) -> Result<IdentityId, ResolveError> {
    let next = high_water_mark.saturating_add(1);
    if next >= reserved_threshold {
        return Err(ResolveError::IdentifierRangeExhausted {
            next,
            threshold: reserved_threshold,
        });
    }
    Ok(IdentityId(next))
}
