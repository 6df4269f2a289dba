//! Group membership derived from validated ID tokens.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use utoipa::ToSchema;

use crate::provider::{IdTokenClaims, Provider, ProviderInfo};

/// A group the host should place the user in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GroupInfo {
    pub name: String,
    /// Provider side identifier, or the name when the provider has no ids.
    pub ugid: String,
}

#[derive(Clone, Copy, Debug)]
pub struct GroupResolver {
    provider: Provider,
}

impl GroupResolver {
    #[must_use]
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }

    /// Groups for the token's owner, first occurrence wins on duplicates.
    #[must_use]
    pub fn resolve(&self, claims: &IdTokenClaims) -> Vec<GroupInfo> {
        let mut seen = HashSet::new();
        self.provider
            .groups(claims)
            .into_iter()
            .filter(|group| !group.name.is_empty() && seen.insert(group.name.to_lowercase()))
            .collect()
    }
}

/// Read a list claim holding either plain names or `{name|displayName, id}` objects.
pub(crate) fn from_claim(claims: &IdTokenClaims, claim: &str) -> Vec<GroupInfo> {
    let Some(Value::Array(values)) = claims.extra.get(claim) else {
        return Vec::new();
    };

    values
        .iter()
        .filter_map(|value| match value {
            Value::String(name) => Some(GroupInfo {
                name: name.clone(),
                ugid: name.clone(),
            }),
            Value::Object(obj) => {
                let name = obj
                    .get("name")
                    .or_else(|| obj.get("displayName"))
                    .and_then(Value::as_str)?;
                let ugid = obj.get("id").and_then(Value::as_str).unwrap_or(name);
                Some(GroupInfo {
                    name: name.to_string(),
                    ugid: ugid.to_string(),
                })
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::provider::claims::tests::encode;
    use serde_json::json;

    fn claims(extra: Value) -> IdTokenClaims {
        let mut body = json!({"iss": "i", "aud": "a", "exp": 1});
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            body.extend(extra.clone());
        }
        IdTokenClaims::decode(&encode(&body)).unwrap()
    }

    #[test]
    fn generic_provider_has_no_groups() {
        let c = claims(json!({"groups": ["wheel"]}));
        assert!(GroupResolver::new(Provider::Generic).resolve(&c).is_empty());
    }

    #[test]
    fn entra_groups_are_deduplicated() {
        let c = claims(json!({
            "groups": ["staff", {"displayName": "Ops", "id": "42"}, "STAFF", 7]
        }));
        let groups = GroupResolver::new(Provider::MsEntraId).resolve(&c);
        assert_eq!(
            groups,
            vec![
                GroupInfo { name: "staff".to_string(), ugid: "staff".to_string() },
                GroupInfo { name: "Ops".to_string(), ugid: "42".to_string() },
            ]
        );
    }
}
