//! Per-session payload encryption.
//!
//! Each session owns a random ChaCha20-Poly1305 key. The host encrypts the
//! authentication data with it; the wire form is base64 of
//! `nonce (12 bytes) || ciphertext`. The AAD binds a payload to its session.

use base64ct::{Base64, Encoding};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::error::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Decrypted authentication data.
#[derive(Default, Deserialize, Serialize)]
pub struct AuthPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<String>,
}

impl std::fmt::Debug for AuthPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPayload")
            .field("challenge", &self.challenge.as_ref().map(|_| "***"))
            .field("wait", &self.wait)
            .finish()
    }
}

/// Generate a fresh session key, base64 encoded.
#[must_use]
pub fn generate_key() -> SecretString {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    SecretString::from(Base64::encode_string(&key))
}

fn cipher(key: &SecretString) -> Result<ChaCha20Poly1305, Error> {
    let bytes = Base64::decode_vec(key.expose_secret())
        .map_err(|_| Error::Payload("invalid session key".to_string()))?;
    if bytes.len() != KEY_LEN {
        return Err(Error::Payload("invalid session key length".to_string()));
    }
    Ok(ChaCha20Poly1305::new(Key::from_slice(&bytes)))
}

fn aad(session_id: &str) -> Vec<u8> {
    format!("oidc-broker:v1|{session_id}").into_bytes()
}

/// Encrypt an authentication payload for a session.
///
/// # Errors
/// Returns an error if the key is malformed or encryption fails.
pub fn encrypt_payload(
    key: &SecretString,
    session_id: &str,
    payload: &AuthPayload,
) -> Result<String, Error> {
    let cipher = cipher(key)?;
    let plaintext = serde_json::to_vec(payload).map_err(|e| Error::Payload(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let aad = aad(session_id);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| Error::Payload(format!("encryption failure: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(Base64::encode_string(&out))
}

/// Decrypt authentication data sent to `IsAuthenticated`.
///
/// Empty data decodes to an empty payload.
///
/// # Errors
/// Returns `Error::Payload` if the data is not valid base64, was not encrypted
/// with this session's key, or does not hold a JSON payload.
pub fn decrypt_payload(
    key: &SecretString,
    session_id: &str,
    data: &str,
) -> Result<AuthPayload, Error> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(AuthPayload::default());
    }

    let raw = Base64::decode_vec(data).map_err(|_| Error::Payload("invalid base64".to_string()))?;
    if raw.len() <= NONCE_LEN {
        return Err(Error::Payload("ciphertext too short".to_string()));
    }
    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);

    let aad = aad(session_id);
    let plaintext = cipher(key)?
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| Error::Payload("decryption failure".to_string()))?;

    serde_json::from_slice(&plaintext).map_err(|e| Error::Payload(e.to_string()))
}
