//! Microsoft Entra ID.

use super::{Endpoints, IdTokenClaims};
use crate::groups::{self, GroupInfo};

pub(super) const ADDITIONAL_SCOPES: &[&str] = &["offline_access"];

/// Entra serves the device authorization endpoint next to the token endpoint
/// but older tenants omit it from discovery.
pub(super) fn complete_endpoints(mut endpoints: Endpoints) -> Endpoints {
    if endpoints.device_authorization.is_none() {
        endpoints.device_authorization = endpoints
            .token
            .as_deref()
            .and_then(|token| token.strip_suffix("/token"))
            .map(|base| format!("{base}/devicecode"));
    }
    endpoints
}

/// Group object ids from the `groups` claim, or app roles when the tenant emits
/// roles instead.
pub(super) fn groups(claims: &IdTokenClaims) -> Vec<GroupInfo> {
    let from_groups = groups::from_claim(claims, "groups");
    if from_groups.is_empty() {
        groups::from_claim(claims, "roles")
    } else {
        from_groups
    }
}
