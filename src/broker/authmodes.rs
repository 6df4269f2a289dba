//! Authentication mode identifiers and their UI layouts.
//!
//! The identifier strings are part of the external contract and must not change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Password checked against the provider, or against the cache when offline.
pub const PASSWORD: &str = "password";
/// Device authorization grant.
pub const DEVICE: &str = "device_auth";
/// Device authorization grant with QR code rendering.
pub const DEVICE_QR: &str = "device_auth_qr";
/// Set a new local password.
pub const NEW_PASSWORD: &str = "newpassword";

pub const LAYOUT_FORM: &str = "form";
pub const LAYOUT_QRCODE: &str = "qrcode";
pub const LAYOUT_NEW_PASSWORD: &str = "newpassword";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum AuthMode {
    #[serde(rename = "password")]
    Password,
    #[serde(rename = "device_auth")]
    Device,
    #[serde(rename = "device_auth_qr")]
    DeviceQr,
    #[serde(rename = "newpassword")]
    NewPassword,
}

impl AuthMode {
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Password => PASSWORD,
            Self::Device => DEVICE,
            Self::DeviceQr => DEVICE_QR,
            Self::NewPassword => NEW_PASSWORD,
        }
    }

    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            PASSWORD => Some(Self::Password),
            DEVICE => Some(Self::Device),
            DEVICE_QR => Some(Self::DeviceQr),
            NEW_PASSWORD => Some(Self::NewPassword),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Password => "Password",
            Self::Device => "Device Authentication",
            Self::DeviceQr => "Device Authentication (QR code)",
            Self::NewPassword => "Define your local password",
        }
    }

    /// Layout kinds able to render this mode, most preferred first.
    #[must_use]
    pub fn compatible_layouts(self) -> &'static [&'static str] {
        match self {
            Self::Password => &[LAYOUT_FORM],
            Self::Device => &[LAYOUT_QRCODE, LAYOUT_FORM],
            Self::DeviceQr => &[LAYOUT_QRCODE],
            Self::NewPassword => &[LAYOUT_NEW_PASSWORD, LAYOUT_FORM],
        }
    }

    /// Pick the first compatible layout the caller supports.
    #[must_use]
    pub fn select_layout(self, supported: &[String]) -> Option<&'static str> {
        self.compatible_layouts()
            .iter()
            .copied()
            .find(|layout| supported.iter().any(|s| s == layout))
    }

    #[must_use]
    pub fn is_device(self) -> bool {
        matches!(self, Self::Device | Self::DeviceQr)
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// A mode offered to the host along with the layout chosen to render it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthModeOffer {
    pub id: String,
    pub label: String,
    pub layout: String,
}

impl AuthModeOffer {
    pub(crate) fn new(mode: AuthMode, layout: &str) -> Self {
        Self {
            id: mode.id().to_string(),
            label: mode.label().to_string(),
            layout: layout.to_string(),
        }
    }
}

/// Layout description returned by `SelectAuthenticationMode`.
pub type UiLayoutInfo = BTreeMap<String, String>;

pub(crate) fn password_layout() -> UiLayoutInfo {
    BTreeMap::from([
        ("type".to_string(), LAYOUT_FORM.to_string()),
        ("label".to_string(), "Gimme your password".to_string()),
        ("entry".to_string(), "chars_password".to_string()),
    ])
}

pub(crate) fn new_password_layout(layout: &str) -> UiLayoutInfo {
    BTreeMap::from([
        ("type".to_string(), layout.to_string()),
        ("label".to_string(), "Create a local password".to_string()),
        ("entry".to_string(), "chars_password".to_string()),
    ])
}

pub(crate) fn device_layout(
    layout: &str,
    render_qr: bool,
    verification_uri: &str,
    user_code: &str,
) -> UiLayoutInfo {
    let label = if render_qr {
        format!("Scan the QR code or access \"{verification_uri}\" and use the provided code")
    } else {
        format!("Access \"{verification_uri}\" and use the provided code")
    };
    BTreeMap::from([
        ("type".to_string(), layout.to_string()),
        ("label".to_string(), label),
        ("content".to_string(), verification_uri.to_string()),
        ("code".to_string(), user_code.to_string()),
        ("wait".to_string(), "true".to_string()),
        ("button".to_string(), "Request new code".to_string()),
        ("qr_rendering".to_string(), render_qr.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for mode in [
            AuthMode::Password,
            AuthMode::Device,
            AuthMode::DeviceQr,
            AuthMode::NewPassword,
        ] {
            assert_eq!(AuthMode::from_id(mode.id()), Some(mode));
        }
        assert_eq!(AuthMode::from_id("otp"), None);
    }

    #[test]
    fn contract_strings_are_stable() {
        assert_eq!(PASSWORD, "password");
        assert_eq!(DEVICE, "device_auth");
        assert_eq!(DEVICE_QR, "device_auth_qr");
        assert_eq!(NEW_PASSWORD, "newpassword");
    }

    #[test]
    fn device_falls_back_to_form_layout() {
        let form = vec!["form".to_string()];
        assert_eq!(AuthMode::Device.select_layout(&form), Some(LAYOUT_FORM));
        assert_eq!(AuthMode::DeviceQr.select_layout(&form), None);

        let both = vec!["form".to_string(), "qrcode".to_string()];
        assert_eq!(AuthMode::Device.select_layout(&both), Some(LAYOUT_QRCODE));
    }

    #[test]
    fn device_layout_carries_code_and_uri() {
        let layout = device_layout("qrcode", true, "https://idp.test/device", "ABCD-EFGH");
        assert_eq!(layout.get("content").map(String::as_str), Some("https://idp.test/device"));
        assert_eq!(layout.get("code").map(String::as_str), Some("ABCD-EFGH"));
        assert_eq!(layout.get("qr_rendering").map(String::as_str), Some("true"));
    }
}
