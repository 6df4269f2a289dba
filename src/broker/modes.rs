//! Authentication mode decision.
//!
//! Precedence:
//! 1. a session past its first step only ever offers `newpassword`;
//! 2. a password change needs the cached token and checks it locally;
//! 3. an unreachable provider leaves only the cached-password path;
//! 4. a reachable provider offers password, then the device flows it supports.

use super::{authmodes::AuthMode, error::Error, session::SessionPurpose};
use crate::provider::Endpoints;

/// Facts the decision is computed from.
#[derive(Clone, Debug)]
pub struct ModeFacts<'a> {
    pub purpose: SessionPurpose,
    pub token_exists: bool,
    pub provider_reachable: bool,
    pub endpoints: &'a Endpoints,
    pub step: u32,
    pub qr_enabled: bool,
}

/// Compute the ordered list of modes to offer.
///
/// # Errors
/// Returns `NoModeAvailable` when no path can authenticate the user.
pub fn decide(facts: &ModeFacts<'_>) -> Result<Vec<AuthMode>, Error> {
    if facts.step > 0 {
        return Ok(vec![AuthMode::NewPassword]);
    }

    if facts.purpose == SessionPurpose::ChangePassword {
        if !facts.token_exists {
            return Err(Error::NoModeAvailable(
                "user has no cached credentials".to_string(),
            ));
        }
        return Ok(vec![AuthMode::Password]);
    }

    // Without a token endpoint nothing online can succeed.
    if !facts.provider_reachable || facts.endpoints.token.is_none() {
        if facts.token_exists {
            return Ok(vec![AuthMode::Password]);
        }
        return Err(Error::NoModeAvailable(
            "provider unreachable and no cached credentials".to_string(),
        ));
    }

    let mut modes = vec![AuthMode::Password];
    if facts.endpoints.device_authorization.is_some() {
        modes.push(AuthMode::Device);
        if facts.qr_enabled {
            modes.push(AuthMode::DeviceQr);
        }
    }
    Ok(modes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(device: bool) -> Endpoints {
        Endpoints {
            token: Some("https://idp.test/token".to_string()),
            device_authorization: device.then(|| "https://idp.test/device".to_string()),
            userinfo: None,
        }
    }

    fn facts(
        purpose: SessionPurpose,
        token_exists: bool,
        provider_reachable: bool,
        endpoints: &Endpoints,
        step: u32,
    ) -> ModeFacts<'_> {
        ModeFacts {
            purpose,
            token_exists,
            provider_reachable,
            endpoints,
            step,
            qr_enabled: true,
        }
    }

    #[test]
    fn offline_with_token_offers_only_password() {
        let ep = endpoints(true);
        let modes = decide(&facts(SessionPurpose::Login, true, false, &ep, 0));
        assert_eq!(modes.ok(), Some(vec![AuthMode::Password]));
    }

    #[test]
    fn offline_without_token_has_no_mode() {
        let ep = endpoints(true);
        let modes = decide(&facts(SessionPurpose::Login, false, false, &ep, 0));
        assert!(matches!(modes, Err(Error::NoModeAvailable(_))));
    }

    #[test]
    fn online_offers_password_then_device_flows_regardless_of_token() {
        let ep = endpoints(true);
        for token_exists in [true, false] {
            let modes = decide(&facts(SessionPurpose::Login, token_exists, true, &ep, 0));
            assert_eq!(
                modes.ok(),
                Some(vec![AuthMode::Password, AuthMode::Device, AuthMode::DeviceQr])
            );
        }
    }

    #[test]
    fn online_without_device_endpoint_offers_password() {
        let ep = endpoints(false);
        let modes = decide(&facts(SessionPurpose::Login, false, true, &ep, 0));
        assert_eq!(modes.ok(), Some(vec![AuthMode::Password]));
    }

    #[test]
    fn reachable_without_token_endpoint_behaves_offline() {
        let ep = Endpoints {
            token: None,
            device_authorization: None,
            userinfo: None,
        };
        let modes = decide(&facts(SessionPurpose::Login, true, true, &ep, 0));
        assert_eq!(modes.ok(), Some(vec![AuthMode::Password]));

        let modes = decide(&facts(SessionPurpose::Login, false, true, &ep, 0));
        assert!(matches!(modes, Err(Error::NoModeAvailable(_))));
    }

    #[test]
    fn qr_disabled_drops_device_qr() {
        let ep = endpoints(true);
        let mut f = facts(SessionPurpose::Login, false, true, &ep, 0);
        f.qr_enabled = false;
        assert_eq!(
            decide(&f).ok(),
            Some(vec![AuthMode::Password, AuthMode::Device])
        );
    }

    #[test]
    fn later_steps_offer_new_password_only() {
        let ep = endpoints(true);
        for purpose in [SessionPurpose::Login, SessionPurpose::ChangePassword] {
            for reachable in [true, false] {
                let modes = decide(&facts(purpose, true, reachable, &ep, 1));
                assert_eq!(modes.ok(), Some(vec![AuthMode::NewPassword]));
            }
        }
    }

    #[test]
    fn change_password_requires_cached_token() {
        let ep = endpoints(true);
        let modes = decide(&facts(SessionPurpose::ChangePassword, false, true, &ep, 0));
        assert!(matches!(modes, Err(Error::NoModeAvailable(_))));

        let modes = decide(&facts(SessionPurpose::ChangePassword, true, true, &ep, 0));
        assert_eq!(modes.ok(), Some(vec![AuthMode::Password]));
    }
}
