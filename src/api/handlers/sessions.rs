//! Session endpoints, one per broker operation.
//!
//! Protocol misuse maps onto HTTP status codes; authentication outcomes are
//! always `200` with the access value in the body.

use crate::broker::{AccessResult, AuthModeOffer, Broker, Error, SessionPurpose};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewSessionRequest {
    pub username: String,
    #[serde(default)]
    pub lang: String,
    /// `login` (default) or `passwd`.
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    SessionPurpose::Login.as_str().to_string()
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct NewSessionResponse {
    pub session_id: String,
    /// Base64 key for encrypting `authentication_data`.
    pub encryption_key: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthenticationModesRequest {
    pub supported_ui_layouts: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthenticationModesResponse {
    pub modes: Vec<AuthModeOffer>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SelectModeRequest {
    pub mode: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SelectModeResponse {
    pub ui_layout_info: BTreeMap<String, String>,
}

#[derive(Deserialize, ToSchema)]
pub struct AuthenticateRequest {
    /// Base64 of nonce and ciphertext; may be empty for device modes.
    #[serde(default)]
    pub authentication_data: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::UnknownSession(_) => StatusCode::NOT_FOUND,
        Error::WrongState { .. } | Error::AlreadyAuthenticating => StatusCode::CONFLICT,
        Error::InvalidMode(_) | Error::Payload(_) | Error::ValidationError(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::NoModeAvailable(_) | Error::ProviderUnreachable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Error::AuthDenied(_)
        | Error::DeviceFlowExpired
        | Error::CacheWriteError(_)
        | Error::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &Error) -> Response {
    let status = status_for(err);
    if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
        error!("broker error: {err}");
    } else {
        debug!("request rejected: {err}");
    }
    (
        status,
        Json(ErrorResponse {
            code: err.code().to_string(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

fn missing_payload() -> Response {
    (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/sessions",
    request_body = NewSessionRequest,
    responses(
        (status = 200, description = "Session opened.", body = NewSessionResponse),
        (status = 400, description = "Invalid request.", body = String),
    ),
    tag = "sessions"
)]
/// Open a session for a user.
pub async fn new_session(
    broker: Extension<Arc<Broker>>,
    payload: Option<Json<NewSessionRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let username = request.username.trim();
    if username.is_empty() {
        return (StatusCode::BAD_REQUEST, "username is required".to_string()).into_response();
    }
    let Some(purpose) = SessionPurpose::parse(&request.mode) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("unsupported session mode: {}", request.mode),
        )
            .into_response();
    };

    let (session_id, key) = broker.new_session(username, &request.lang, purpose);
    let response = NewSessionResponse {
        session_id,
        encryption_key: key.expose_secret().to_string(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/authentication-modes",
    params(("id" = String, Path, description = "Session id")),
    request_body = AuthenticationModesRequest,
    responses(
        (status = 200, description = "Modes the user can authenticate with.", body = AuthenticationModesResponse),
        (status = 404, description = "Unknown session.", body = ErrorResponse),
        (status = 409, description = "Session is busy or in the wrong state.", body = ErrorResponse),
        (status = 503, description = "No mode available.", body = ErrorResponse),
    ),
    tag = "sessions"
)]
pub async fn authentication_modes(
    Path(id): Path<String>,
    broker: Extension<Arc<Broker>>,
    payload: Option<Json<AuthenticationModesRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match broker
        .get_authentication_modes(&id, &request.supported_ui_layouts)
        .await
    {
        Ok(modes) => (StatusCode::OK, Json(AuthenticationModesResponse { modes })).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/authentication-mode",
    params(("id" = String, Path, description = "Session id")),
    request_body = SelectModeRequest,
    responses(
        (status = 200, description = "Layout describing how to collect the credential.", body = SelectModeResponse),
        (status = 400, description = "Mode was not offered.", body = ErrorResponse),
        (status = 404, description = "Unknown session.", body = ErrorResponse),
        (status = 409, description = "Session is busy or in the wrong state.", body = ErrorResponse),
        (status = 503, description = "Provider unreachable.", body = ErrorResponse),
    ),
    tag = "sessions"
)]
pub async fn select_authentication_mode(
    Path(id): Path<String>,
    broker: Extension<Arc<Broker>>,
    payload: Option<Json<SelectModeRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match broker.select_authentication_mode(&id, &request.mode).await {
        Ok(ui_layout_info) => {
            (StatusCode::OK, Json(SelectModeResponse { ui_layout_info })).into_response()
        }
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/authenticate",
    params(("id" = String, Path, description = "Session id")),
    request_body = AuthenticateRequest,
    responses(
        (status = 200, description = "Outcome of the attempt.", body = AccessResult),
        (status = 400, description = "Authentication data could not be decrypted.", body = ErrorResponse),
        (status = 404, description = "Unknown session.", body = ErrorResponse),
        (status = 409, description = "Session is busy or in the wrong state.", body = ErrorResponse),
    ),
    tag = "sessions"
)]
/// Drive the selected mode. Device modes answer `authenticating` until the
/// user confirms or the code expires.
pub async fn authenticate(
    Path(id): Path<String>,
    broker: Extension<Arc<Broker>>,
    payload: Option<Json<AuthenticateRequest>>,
) -> impl IntoResponse {
    let data = payload
        .map(|Json(request)| request.authentication_data)
        .unwrap_or_default();

    match broker.is_authenticated(&id, &data).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/cancel",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 204, description = "Running attempt cancelled."),
        (status = 404, description = "Unknown session.", body = ErrorResponse),
    ),
    tag = "sessions"
)]
pub async fn cancel(Path(id): Path<String>, broker: Extension<Arc<Broker>>) -> impl IntoResponse {
    match broker.cancel_is_authenticated(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/sessions/{id}",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session ended, or was already gone."),
    ),
    tag = "sessions"
)]
pub async fn end_session(
    Path(id): Path<String>,
    broker: Extension<Arc<Broker>>,
) -> impl IntoResponse {
    broker.end_session(&id);
    StatusCode::NO_CONTENT
}
