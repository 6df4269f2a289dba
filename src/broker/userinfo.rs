//! Identity data handed to the host on a granted login.

use serde::{Deserialize, Serialize};
use std::path::Path;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{groups::GroupInfo, provider::IdTokenClaims};

const DEFAULT_SHELL: &str = "/bin/bash";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub name: String,
    /// Stable per issuer and subject.
    pub uuid: String,
    pub dir: String,
    pub shell: String,
    pub gecos: String,
    pub groups: Vec<GroupInfo>,
}

impl UserInfo {
    #[must_use]
    pub fn from_claims(
        username: &str,
        claims: &IdTokenClaims,
        groups: Vec<GroupInfo>,
        home_base_dir: &Path,
    ) -> Self {
        let name = username.to_lowercase();
        let subject = if claims.sub.is_empty() {
            name.as_str()
        } else {
            claims.sub.as_str()
        };
        let uuid = Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            format!("{}#{subject}", claims.iss.trim_end_matches('/')).as_bytes(),
        );

        Self {
            dir: home_base_dir.join(&name).to_string_lossy().into_owned(),
            uuid: uuid.to_string(),
            shell: DEFAULT_SHELL.to_string(),
            gecos: claims.name.clone().unwrap_or_else(|| name.clone()),
            groups,
            name,
        }
    }

    /// The `data` string returned with `granted`.
    #[must_use]
    pub fn to_access_data(&self) -> String {
        serde_json::json!({ "userinfo": self }).to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::provider::claims::tests::encode;
    use serde_json::{Value, json};

    #[test]
    fn builds_home_and_stable_uuid() {
        let token = encode(&json!({
            "iss": "https://idp.test/", "aud": "c", "exp": 1,
            "sub": "abc", "name": "Alice Liddell"
        }));
        let claims = IdTokenClaims::decode(&token).unwrap();
        let a = UserInfo::from_claims("Alice@Example.com", &claims, Vec::new(), Path::new("/home"));
        let b = UserInfo::from_claims("alice@example.com", &claims, Vec::new(), Path::new("/home"));

        assert_eq!(a.dir, "/home/alice@example.com");
        assert_eq!(a.gecos, "Alice Liddell");
        assert_eq!(a.uuid, b.uuid);

        let data: Value = serde_json::from_str(&a.to_access_data()).unwrap();
        assert_eq!(data["userinfo"]["name"], "alice@example.com");
    }
}
