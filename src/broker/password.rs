//! Local password policy.

use super::error::Error;

const MIN_PASSWORD_LEN: usize = 8;

/// Check a new local password before it is bound to the cached token.
///
/// # Errors
/// Returns `ValidationError` describing the first rule the password breaks.
pub fn validate_new_password(username: &str, password: &str) -> Result<(), Error> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::ValidationError(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }

    let mut chars = password.chars();
    if let Some(first) = chars.next() {
        if chars.all(|c| c == first) {
            return Err(Error::ValidationError(
                "password must not repeat a single character".to_string(),
            ));
        }
    }

    if password.eq_ignore_ascii_case(username) {
        return Err(Error::ValidationError(
            "password must differ from the username".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_new_password;
    use crate::broker::Error;

    #[test]
    fn accepts_reasonable_password() {
        assert!(validate_new_password("alice", "correct horse").is_ok());
    }

    #[test]
    fn rejects_short_repeated_and_username() {
        for weak in ["short", "aaaaaaaaaa", "alice-the-user"] {
            let username = if weak == "alice-the-user" { weak } else { "alice" };
            let err = validate_new_password(username, weak).err();
            assert!(matches!(err, Some(Error::ValidationError(_))), "{weak}");
        }
    }
}
