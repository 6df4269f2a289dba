//! ID token claims.
//!
//! The ID token is read straight from the token endpoint response over TLS, so
//! only its claims are decoded and checked here; the signature is not verified.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use super::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    #[serde(deserialize_with = "one_or_many")]
    pub aud: Vec<String>,
    pub exp: i64,
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Every other claim, including provider specific group claims.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Audience {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Audience::deserialize(deserializer)? {
        Audience::One(aud) => vec![aud],
        Audience::Many(aud) => aud,
    })
}

impl IdTokenClaims {
    /// Decode the payload segment of a compact JWT.
    ///
    /// # Errors
    /// Returns `Error::Claims` if the token is not a three segment JWT or the
    /// payload is not a JSON claim set.
    pub fn decode(id_token: &str) -> Result<Self, Error> {
        let mut segments = id_token.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(Error::Claims("malformed id token".to_string()));
        };

        let bytes = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('='))
            .map_err(|_| Error::Claims("id token payload is not base64url".to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Claims(e.to_string()))
    }

    /// The username the provider asserts for this token.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.preferred_username
            .as_deref()
            .or(self.email.as_deref())
    }

    /// Check issuer, audience, expiry and that the token belongs to `username`.
    ///
    /// # Errors
    /// Returns `Error::Claims` naming the first check that fails.
    pub fn validate(
        &self,
        issuer: &str,
        client_id: &str,
        username: &str,
        now_unix: i64,
    ) -> Result<(), Error> {
        if self.iss.trim_end_matches('/') != issuer.trim_end_matches('/') {
            return Err(Error::Claims(format!("unexpected issuer {}", self.iss)));
        }
        if !self.aud.iter().any(|aud| aud == client_id) {
            return Err(Error::Claims("token was not issued for this client".to_string()));
        }
        if self.exp <= now_unix {
            return Err(Error::Claims("token is expired".to_string()));
        }
        match self.username() {
            Some(name) if name.eq_ignore_ascii_case(username) => Ok(()),
            Some(name) => Err(Error::Claims(format!(
                "token belongs to {name}, not {username}"
            ))),
            None => Err(Error::Claims("token carries no username".to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn encode(claims: &Value) -> String {
        let header = Base64UrlUnpadded::encode_string(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = Base64UrlUnpadded::encode_string(claims.to_string().as_bytes());
        format!("{header}.{payload}.c2ln")
    }

    fn claims(aud: Value) -> Value {
        json!({
            "iss": "https://idp.test/",
            "aud": aud,
            "exp": 2_000,
            "sub": "0001",
            "preferred_username": "Alice@Example.com",
            "groups": ["wheel"]
        })
    }

    #[test]
    fn decodes_single_and_list_audience() {
        let c = IdTokenClaims::decode(&encode(&claims(json!("client")))).unwrap();
        assert_eq!(c.aud, vec!["client".to_string()]);
        assert!(c.extra.contains_key("groups"));

        let c = IdTokenClaims::decode(&encode(&claims(json!(["a", "client"])))).unwrap();
        assert_eq!(c.aud.len(), 2);
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(IdTokenClaims::decode("not-a-jwt").is_err());
        assert!(IdTokenClaims::decode("a.b.c.d").is_err());
        assert!(IdTokenClaims::decode("a.!!!.c").is_err());
    }

    #[test]
    fn validate_checks_binding() {
        let c = IdTokenClaims::decode(&encode(&claims(json!("client")))).unwrap();
        assert!(c.validate("https://idp.test", "client", "alice@example.com", 1_000).is_ok());
        assert!(c.validate("https://other.test", "client", "alice@example.com", 1_000).is_err());
        assert!(c.validate("https://idp.test", "other", "alice@example.com", 1_000).is_err());
        assert!(c.validate("https://idp.test", "client", "alice@example.com", 2_000).is_err());
        assert!(c.validate("https://idp.test", "client", "bob@example.com", 1_000).is_err());
    }
}
