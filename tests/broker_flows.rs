#![allow(clippy::unwrap_used)]

use base64ct::{Base64UrlUnpadded, Encoding};
use oidc_broker::{
    broker::{
        Access, Broker, Config, Error, SessionPurpose,
        crypto::{AuthPayload, encrypt_payload},
    },
    cache::TokenCache,
};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::{
    net::TcpListener,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

const CLIENT_ID: &str = "workstation";
// 2100-01-01
const FAR_FUTURE: i64 = 4_102_444_800;

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn id_token(issuer: &str, username: &str) -> String {
    let claims = json!({
        "iss": issuer,
        "aud": CLIENT_ID,
        "exp": FAR_FUTURE,
        "sub": format!("sub-{username}"),
        "preferred_username": username,
        "name": "Alice Liddell",
    });
    let header = Base64UrlUnpadded::encode_string(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = Base64UrlUnpadded::encode_string(claims.to_string().as_bytes());
    format!("{header}.{payload}.c2ln")
}

fn token_body(issuer: &str, username: &str) -> Value {
    json!({
        "access_token": format!("access-{username}"),
        "refresh_token": format!("refresh-{username}"),
        "id_token": id_token(issuer, username),
        "token_type": "Bearer",
        "expires_in": 3600,
    })
}

async fn provider(device: bool) -> MockServer {
    let server = MockServer::start().await;
    let mut doc = json!({
        "issuer": server.uri(),
        "token_endpoint": format!("{}/token", server.uri()),
    });
    if device {
        doc["device_authorization_endpoint"] = json!(format!("{}/device", server.uri()));
    }
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(doc))
        .mount(&server)
        .await;
    server
}

async fn mount_device_code(server: &MockServer, expires_in: u64) {
    Mock::given(method("POST"))
        .and(path("/device"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "dc",
            "user_code": "WDJB-MJHT",
            "verification_uri": "https://idp.example.com/device",
            "verification_uri_complete": "https://idp.example.com/device?user_code=WDJB-MJHT",
            "expires_in": expires_in,
            "interval": 1,
        })))
        .mount(server)
        .await;
}

async fn mount_password_grant(server: &MockServer, username: &str, password: &str) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains(format!("password={password}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&server.uri(), username)))
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid user credentials",
        })))
        .with_priority(2)
        .mount(server)
        .await;
}

fn broker(issuer: &str, cache: &Path, poll_window: Duration) -> Arc<Broker> {
    let config = Config::new(issuer.to_string(), CLIENT_ID.to_string())
        .with_cache_path(cache.to_path_buf())
        .with_poll_window(poll_window)
        .with_http_timeout(Duration::from_secs(2));
    Arc::new(Broker::new(config).unwrap())
}

/// A broker whose provider can never be reached.
fn offline_broker(cache: &Path) -> Arc<Broker> {
    broker("http://127.0.0.1:1", cache, Duration::from_secs(1))
}

fn layouts(kinds: &[&str]) -> Vec<String> {
    kinds.iter().map(ToString::to_string).collect()
}

fn challenge(key: &SecretString, session_id: &str, secret: &str) -> String {
    let payload = AuthPayload {
        challenge: Some(secret.to_string()),
        wait: None,
    };
    encrypt_payload(key, session_id, &payload).unwrap()
}

fn mode_ids(offers: &[oidc_broker::broker::AuthModeOffer]) -> Vec<&str> {
    offers.iter().map(|offer| offer.id.as_str()).collect()
}

async fn password_login(
    broker: &Broker,
    username: &str,
    password: &str,
) -> oidc_broker::broker::AccessResult {
    let (id, key) = broker.new_session(username, "en", SessionPurpose::Login);
    broker
        .get_authentication_modes(&id, &layouts(&["form"]))
        .await
        .unwrap();
    broker.select_authentication_mode(&id, "password").await.unwrap();
    let result = broker
        .is_authenticated(&id, &challenge(&key, &id, password))
        .await
        .unwrap();
    broker.end_session(&id);
    result
}

#[tokio::test]
async fn online_password_login_is_granted_and_cached() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return;
    }
    let server = provider(true).await;
    mount_password_grant(&server, "alice", "correct-secret").await;
    let dir = tempfile::tempdir().unwrap();
    let broker = broker(&server.uri(), dir.path(), Duration::from_secs(1));

    let (id, key) = broker.new_session("alice", "en", SessionPurpose::Login);
    let modes = broker
        .get_authentication_modes(&id, &layouts(&["form"]))
        .await
        .unwrap();
    assert_eq!(mode_ids(&modes), vec!["password", "device_auth"]);

    let layout = broker.select_authentication_mode(&id, "password").await.unwrap();
    assert_eq!(layout.get("type").map(String::as_str), Some("form"));
    assert_eq!(layout.get("entry").map(String::as_str), Some("chars_password"));

    let result = broker
        .is_authenticated(&id, &challenge(&key, &id, "correct-secret"))
        .await
        .unwrap();
    assert_eq!(result.access, Access::Granted);
    let data: Value = serde_json::from_str(&result.data).unwrap();
    assert_eq!(data["userinfo"]["name"], "alice");
    assert_eq!(data["userinfo"]["dir"], "/home/alice");

    let cache = TokenCache::new(dir.path()).unwrap();
    let token = cache.load("alice").await.unwrap();
    assert_eq!(token.access_token, "access-alice");
    assert!(!token.is_expired(0));
}

#[tokio::test]
async fn wrong_password_is_denied_and_retryable() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return;
    }
    let server = provider(false).await;
    mount_password_grant(&server, "alice", "correct-secret").await;
    let dir = tempfile::tempdir().unwrap();
    let broker = broker(&server.uri(), dir.path(), Duration::from_secs(1));

    let (id, key) = broker.new_session("alice", "en", SessionPurpose::Login);
    let modes = broker
        .get_authentication_modes(&id, &layouts(&["form", "qrcode"]))
        .await
        .unwrap();
    assert_eq!(mode_ids(&modes), vec!["password"]);
    broker.select_authentication_mode(&id, "password").await.unwrap();

    let result = broker
        .is_authenticated(&id, &challenge(&key, &id, "nope"))
        .await
        .unwrap();
    assert_eq!(result.access, Access::Denied);
    assert!(result.data.contains("message"));

    // Denied sessions may ask for modes again and retry.
    broker
        .get_authentication_modes(&id, &layouts(&["form"]))
        .await
        .unwrap();
    broker.select_authentication_mode(&id, "password").await.unwrap();
    let result = broker
        .is_authenticated(&id, &challenge(&key, &id, "correct-secret"))
        .await
        .unwrap();
    assert_eq!(result.access, Access::Granted);
}

#[tokio::test]
async fn unreachable_without_cache_has_no_mode() {
    let dir = tempfile::tempdir().unwrap();
    let broker = offline_broker(dir.path());

    let (id, _) = broker.new_session("bob", "en", SessionPurpose::Login);
    let result = broker
        .get_authentication_modes(&id, &layouts(&["form", "qrcode"]))
        .await;
    assert!(matches!(result, Err(Error::NoModeAvailable(_))));
}

#[tokio::test]
async fn offline_login_uses_cached_password() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return;
    }
    let server = provider(true).await;
    mount_password_grant(&server, "alice", "correct-secret").await;
    let dir = tempfile::tempdir().unwrap();

    let online = broker(&server.uri(), dir.path(), Duration::from_secs(1));
    assert_eq!(
        password_login(&online, "alice", "correct-secret").await.access,
        Access::Granted
    );

    let offline = offline_broker(dir.path());
    let (id, _) = offline.new_session("alice", "en", SessionPurpose::Login);
    let modes = offline
        .get_authentication_modes(&id, &layouts(&["form", "qrcode"]))
        .await
        .unwrap();
    assert_eq!(mode_ids(&modes), vec!["password"]);

    assert_eq!(
        password_login(&offline, "alice", "correct-secret").await.access,
        Access::Granted
    );
    assert_eq!(
        password_login(&offline, "alice", "wrong-secret").await.access,
        Access::Denied
    );
}

#[tokio::test]
async fn change_password_takes_two_steps() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return;
    }
    let server = provider(false).await;
    mount_password_grant(&server, "alice", "correct-secret").await;
    let dir = tempfile::tempdir().unwrap();
    let online = broker(&server.uri(), dir.path(), Duration::from_secs(1));
    assert_eq!(
        password_login(&online, "alice", "correct-secret").await.access,
        Access::Granted
    );

    let broker = offline_broker(dir.path());
    let (id, key) = broker.new_session("alice", "en", SessionPurpose::ChangePassword);
    let modes = broker
        .get_authentication_modes(&id, &layouts(&["form", "newpassword"]))
        .await
        .unwrap();
    assert_eq!(mode_ids(&modes), vec!["password"]);
    broker.select_authentication_mode(&id, "password").await.unwrap();
    let result = broker
        .is_authenticated(&id, &challenge(&key, &id, "correct-secret"))
        .await
        .unwrap();
    assert_eq!(result.access, Access::Next);

    let modes = broker
        .get_authentication_modes(&id, &layouts(&["form", "newpassword"]))
        .await
        .unwrap();
    assert_eq!(mode_ids(&modes), vec!["newpassword"]);
    let layout = broker
        .select_authentication_mode(&id, "newpassword")
        .await
        .unwrap();
    assert_eq!(layout.get("type").map(String::as_str), Some("newpassword"));

    // Policy violations are denied without touching the cache.
    let result = broker
        .is_authenticated(&id, &challenge(&key, &id, "short"))
        .await
        .unwrap();
    assert_eq!(result.access, Access::Denied);

    let modes = broker
        .get_authentication_modes(&id, &layouts(&["form"]))
        .await
        .unwrap();
    assert_eq!(mode_ids(&modes), vec!["newpassword"]);
    broker
        .select_authentication_mode(&id, "newpassword")
        .await
        .unwrap();
    let result = broker
        .is_authenticated(&id, &challenge(&key, &id, "a-brand-new-secret"))
        .await
        .unwrap();
    assert_eq!(result.access, Access::Granted);
    broker.end_session(&id);

    assert_eq!(
        password_login(&broker, "alice", "a-brand-new-secret").await.access,
        Access::Granted
    );
    assert_eq!(
        password_login(&broker, "alice", "correct-secret").await.access,
        Access::Denied
    );
}

#[tokio::test]
async fn device_login_then_local_password() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return;
    }
    let server = provider(true).await;
    mount_device_code(&server, 60).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("device_code=dc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&server.uri(), "alice")))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let broker = broker(&server.uri(), dir.path(), Duration::from_secs(5));

    let (id, key) = broker.new_session("alice", "en", SessionPurpose::Login);
    let modes = broker
        .get_authentication_modes(&id, &layouts(&["form", "qrcode"]))
        .await
        .unwrap();
    assert_eq!(
        mode_ids(&modes),
        vec!["password", "device_auth", "device_auth_qr"]
    );

    let layout = broker
        .select_authentication_mode(&id, "device_auth_qr")
        .await
        .unwrap();
    assert_eq!(layout.get("code").map(String::as_str), Some("WDJB-MJHT"));
    assert_eq!(layout.get("qr_rendering").map(String::as_str), Some("true"));
    assert_eq!(
        layout.get("content").map(String::as_str),
        Some("https://idp.example.com/device?user_code=WDJB-MJHT")
    );

    let mut result = broker.is_authenticated(&id, "").await.unwrap();
    for _ in 0..5 {
        if result.access != Access::Authenticating {
            break;
        }
        result = broker.is_authenticated(&id, "").await.unwrap();
    }
    assert_eq!(result.access, Access::Next);

    let modes = broker
        .get_authentication_modes(&id, &layouts(&["form"]))
        .await
        .unwrap();
    assert_eq!(mode_ids(&modes), vec!["newpassword"]);
    broker
        .select_authentication_mode(&id, "newpassword")
        .await
        .unwrap();
    let result = broker
        .is_authenticated(&id, &challenge(&key, &id, "a-brand-new-secret"))
        .await
        .unwrap();
    assert_eq!(result.access, Access::Granted);

    let offline = offline_broker(dir.path());
    assert_eq!(
        password_login(&offline, "alice", "a-brand-new-secret").await.access,
        Access::Granted
    );
}

#[tokio::test]
async fn unconfirmed_device_code_expires() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return;
    }
    let server = provider(true).await;
    mount_device_code(&server, 2).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "authorization_pending"})),
        )
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let broker = broker(&server.uri(), dir.path(), Duration::from_secs(1));

    let (id, _) = broker.new_session("alice", "en", SessionPurpose::Login);
    broker
        .get_authentication_modes(&id, &layouts(&["form"]))
        .await
        .unwrap();
    broker
        .select_authentication_mode(&id, "device_auth")
        .await
        .unwrap();

    let mut result = broker.is_authenticated(&id, "").await.unwrap();
    for _ in 0..10 {
        if result.access != Access::Authenticating {
            break;
        }
        result = broker.is_authenticated(&id, "").await.unwrap();
    }
    assert_eq!(result.access, Access::Denied);
    assert!(result.data.contains("expired"));
}

#[tokio::test]
async fn cancel_interrupts_blocked_call() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return;
    }
    let server = provider(true).await;
    mount_device_code(&server, 600).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "authorization_pending"})),
        )
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let broker = broker(&server.uri(), dir.path(), Duration::from_secs(30));

    let (id, _) = broker.new_session("alice", "en", SessionPurpose::Login);
    broker
        .get_authentication_modes(&id, &layouts(&["form"]))
        .await
        .unwrap();
    broker
        .select_authentication_mode(&id, "device_auth")
        .await
        .unwrap();

    let blocked = {
        let broker = broker.clone();
        let id = id.clone();
        tokio::spawn(async move { broker.is_authenticated(&id, "").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    broker.cancel_is_authenticated(&id).unwrap();
    let result = blocked.await.unwrap().unwrap();
    assert_eq!(result.access, Access::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));

    // Back at mode selection.
    broker
        .get_authentication_modes(&id, &layouts(&["form"]))
        .await
        .unwrap();
}

#[tokio::test]
async fn second_call_during_attempt_is_rejected() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return;
    }
    let server = provider(true).await;
    mount_device_code(&server, 600).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "authorization_pending"})),
        )
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let broker = broker(&server.uri(), dir.path(), Duration::from_secs(30));

    let (id, _) = broker.new_session("alice", "en", SessionPurpose::Login);
    broker
        .get_authentication_modes(&id, &layouts(&["form"]))
        .await
        .unwrap();
    broker
        .select_authentication_mode(&id, "device_auth")
        .await
        .unwrap();

    let blocked = {
        let broker = broker.clone();
        let id = id.clone();
        tokio::spawn(async move { broker.is_authenticated(&id, "").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(matches!(
        broker.is_authenticated(&id, "").await,
        Err(Error::AlreadyAuthenticating)
    ));
    assert!(matches!(
        broker.select_authentication_mode(&id, "password").await,
        Err(Error::AlreadyAuthenticating)
    ));
    assert!(!blocked.is_finished());

    broker.cancel_is_authenticated(&id).unwrap();
    let result = blocked.await.unwrap().unwrap();
    assert_eq!(result.access, Access::Cancelled);
}

#[tokio::test]
async fn failed_cache_write_denies_online_login() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return;
    }
    let server = provider(false).await;
    mount_password_grant(&server, "alice", "correct-secret").await;
    let dir = tempfile::tempdir().unwrap();
    // A non-empty directory where the record belongs cannot be replaced.
    let record = dir.path().join("alice.json");
    std::fs::create_dir(&record).unwrap();
    std::fs::write(record.join("keep"), b"x").unwrap();
    let broker = broker(&server.uri(), dir.path(), Duration::from_secs(1));

    let result = password_login(&broker, "alice", "correct-secret").await;
    assert_eq!(result.access, Access::Denied);
    assert!(result.data.contains("could not update the token cache"));

    assert!(record.is_dir());
    let cache = TokenCache::new(dir.path()).unwrap();
    assert!(cache.load("alice").await.is_err());
}

#[tokio::test]
async fn corrupt_cache_record_denies_offline_login() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("alice.json"), b"{").unwrap();
    let broker = offline_broker(dir.path());

    let result = password_login(&broker, "alice", "local-secret").await;
    assert_eq!(result.access, Access::Denied);
    assert!(result.data.contains("cached credentials unusable"));
    assert!(!result.data.contains("could not update"));
}

#[tokio::test]
async fn protocol_misuse_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let broker = offline_broker(dir.path());

    assert!(matches!(
        broker.is_authenticated("missing", "").await,
        Err(Error::UnknownSession(_))
    ));

    let (id, _) = broker.new_session("alice", "en", SessionPurpose::Login);
    assert!(matches!(
        broker.is_authenticated(&id, "").await,
        Err(Error::WrongState { .. })
    ));
    assert!(matches!(
        broker.select_authentication_mode(&id, "password").await,
        Err(Error::WrongState { .. })
    ));

    broker.end_session(&id);
    broker.end_session(&id);
    assert_eq!(broker.live_sessions(), 0);
    assert!(matches!(
        broker.cancel_is_authenticated(&id),
        Err(Error::UnknownSession(_))
    ));
}

#[tokio::test]
async fn shutdown_ends_every_session() {
    let dir = tempfile::tempdir().unwrap();
    let broker = offline_broker(dir.path());
    broker.new_session("alice", "en", SessionPurpose::Login);
    broker.new_session("bob", "en", SessionPurpose::ChangePassword);
    assert_eq!(broker.live_sessions(), 2);

    broker.shutdown();
    assert_eq!(broker.live_sessions(), 0);
}
