use super::IdTokenClaims;
use crate::groups::GroupInfo;

pub(super) const ADDITIONAL_SCOPES: &[&str] = &[];

/// Generic providers carry no group convention.
pub(super) fn groups(_claims: &IdTokenClaims) -> Vec<GroupInfo> {
    Vec::new()
}
