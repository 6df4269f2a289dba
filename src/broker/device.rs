//! Device authorization polling (RFC 8628).

use std::time::Duration;
use tokio::{sync::watch, time::Instant};
use tracing::{debug, info, warn};

use super::{
    error::Error,
    flow::{AuthFlowEngine, Cancellation, FlowStatus},
    userinfo::UserInfo,
};
use crate::provider::{self, DeviceAuthorization, DevicePoll, Endpoints};

/// Consecutive transport failures tolerated before giving up.
const MAX_TRANSPORT_ERRORS: u32 = 3;
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);
const MIN_INTERVAL: Duration = Duration::from_secs(1);
const MAX_INTERVAL: Duration = Duration::from_secs(60);
/// Upper bound on the code lifetime a provider may announce.
const MAX_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Poll until the code is confirmed, denied, expired or cancelled, then report
/// the outcome on `tx`.
pub(super) async fn poll(
    engine: AuthFlowEngine,
    username: String,
    endpoints: Endpoints,
    authorization: DeviceAuthorization,
    cancel: Cancellation,
    tx: watch::Sender<FlowStatus>,
) {
    let result = run(&engine, &username, &endpoints, &authorization, &cancel, &tx).await;
    match &result {
        Ok(_) => info!(username = %username, "device login confirmed"),
        Err(err) => debug!(username = %username, "device flow ended: {err}"),
    }
    tx.send_replace(FlowStatus::Done(result));
}

fn lifetime(authorization: &DeviceAuthorization) -> Duration {
    let announced = Duration::from_secs(authorization.expires_in);
    if announced > MAX_LIFETIME {
        warn!(
            expires_in = authorization.expires_in,
            "device code lifetime capped at {}s",
            MAX_LIFETIME.as_secs()
        );
    }
    announced.min(MAX_LIFETIME)
}

async fn run(
    engine: &AuthFlowEngine,
    username: &str,
    endpoints: &Endpoints,
    authorization: &DeviceAuthorization,
    cancel: &Cancellation,
    tx: &watch::Sender<FlowStatus>,
) -> Result<UserInfo, Error> {
    let deadline = Instant::now() + lifetime(authorization);
    let mut interval =
        Duration::from_secs(authorization.interval).clamp(MIN_INTERVAL, MAX_INTERVAL);
    let mut transport_errors = 0;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::DeviceFlowExpired);
        }
        // Nobody can observe the outcome any more.
        if tx.is_closed() {
            return Err(Error::Cancelled);
        }

        let wait = interval.min(deadline - now);
        cancel
            .run(async {
                tokio::time::sleep(wait).await;
                Ok(())
            })
            .await?;
        if Instant::now() >= deadline {
            return Err(Error::DeviceFlowExpired);
        }

        let polled = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            polled = engine.poll_device_token(endpoints, &authorization.device_code) => polled,
        };

        match polled {
            Ok(DevicePoll::Pending) => transport_errors = 0,
            Ok(DevicePoll::SlowDown) => {
                transport_errors = 0;
                interval = (interval + SLOW_DOWN_STEP).min(MAX_INTERVAL);
                debug!(interval_secs = interval.as_secs(), "provider asked to slow down");
            }
            Ok(DevicePoll::Token(token)) => {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                return engine.complete_device_login(username, &token).await;
            }
            Err(provider::Error::Unreachable(reason)) => {
                transport_errors += 1;
                warn!(attempt = transport_errors, "device poll failed: {reason}");
                if transport_errors >= MAX_TRANSPORT_ERRORS {
                    return Err(Error::ProviderUnreachable(reason));
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}
