//! Concurrent health polling over named pingers.
//!
//! Each registered subsystem (database, cache, broker, ...) exposes a
//! [`Pinger`]; [`retrieve_health_status`] polls them all in parallel and
//! classifies each outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::error;

/// Outcome of polling one pinger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// The resource answered in time.
    Ok,
    /// The resource did not answer within the allotted timeout.
    Timeout,
    /// The resource answered with an error.
    Error,
}

impl HealthStatus {
    /// Static string form, for logs and health payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

/// A subsystem that can be asked whether its backing resource is reachable.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Checks the backing resource.
    ///
    /// # Errors
    ///
    /// Returns the underlying failure when the resource is unreachable or
    /// unhealthy.
    async fn ping(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Polls every pinger concurrently and reports the status per name.
///
/// Pingers that do not answer within `timeout` are reported as
/// [`HealthStatus::Timeout`]; errors are logged and reported as
/// [`HealthStatus::Error`].
pub async fn retrieve_health_status(
    timeout: Duration,
    pingers: &HashMap<String, Arc<dyn Pinger>>,
) -> HashMap<String, HealthStatus> {
    let polls = pingers.iter().map(|(name, pinger)| {
        let name = name.clone();
        let pinger = Arc::clone(pinger);
        async move {
            let status = match tokio::time::timeout(timeout, pinger.ping()).await {
                Ok(Ok(())) => HealthStatus::Ok,
                Ok(Err(err)) => {
                    error!(name = %name, error = %err, "health check failed");
                    HealthStatus::Error
                }
                Err(_) => HealthStatus::Timeout,
            };
            (name, status)
        }
    });

    join_all(polls).await.into_iter().collect()
}
