use crate::{GIT_COMMIT_HASH, broker::Broker};
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    sessions: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    responses (
        (status = 200, description = "Broker is running", body = Health)
    ),
    tag = "health",
)]
/// Report build information and the number of live sessions.
pub async fn health(broker: Extension<Arc<Broker>>) -> impl IntoResponse {
    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: broker.live_sessions(),
    };

    let short_hash = health.commit.get(0..7).unwrap_or_default();

    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(value) => {
            headers.insert("X-App", value);
        }
        Err(err) => debug!("Failed to parse X-App header: {}", err),
    }

    (StatusCode::OK, headers, Json(health))
}
