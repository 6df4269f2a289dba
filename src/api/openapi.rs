use crate::api::handlers::{health, sessions};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Router that both serves the documented endpoints and builds the `OpenAPI` document.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(sessions::new_session))
        .routes(routes!(sessions::authentication_modes))
        .routes(routes!(sessions::select_authentication_mode))
        .routes(routes!(sessions::authenticate))
        .routes(routes!(sessions::cancel))
        .routes(routes!(sessions::end_session));

    let mut sessions_tag = Tag::new("sessions");
    sessions_tag.description = Some("Authentication sessions driven by the login host".to_string());
    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Service status".to_string());
    router.get_openapi_mut().tags = Some(vec![sessions_tag, health_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    Some(value.trim()).filter(|trimmed| !trimmed.is_empty())
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    let non_empty: fn(&str) -> Option<&str> = |s| Some(s.trim()).filter(|t| !t.is_empty());
    match author.find('<') {
        Some(start) => (
            non_empty(&author[..start]),
            non_empty(author[start + 1..].trim_end_matches('>')),
        ),
        None => (non_empty(author), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_with_email() {
        assert_eq!(
            parse_author("Team OIDC Broker <team@oidc-broker.dev>"),
            (Some("Team OIDC Broker"), Some("team@oidc-broker.dev"))
        );
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
        assert_eq!(parse_author("  "), (None, None));
    }

    #[test]
    fn document_lists_session_routes() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        for path in [
            "/health",
            "/v1/sessions",
            "/v1/sessions/{id}",
            "/v1/sessions/{id}/authentication-modes",
            "/v1/sessions/{id}/authentication-mode",
            "/v1/sessions/{id}/authenticate",
            "/v1/sessions/{id}/cancel",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
