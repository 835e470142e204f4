//! Readiness polling for a freshly created service.

use crate::error::Result;
use crate::gateway::RuntimeGateway;
use crate::types::{HealthStatus, ServiceId};
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a readiness wait ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthCheckOutcome {
    Healthy(ServiceId),
    Timeout { last_status: HealthStatus },
    Cancelled { last_status: HealthStatus },
}

/// Polls the gateway until the service reports `Running` or `Healthy`.
///
/// The wait ends at whichever comes first: a ready status, `timeout`
/// elapsing, or `cancel` firing. Gateway errors are propagated as-is. The
/// service is never removed here.
pub async fn ensure_healthy(
    gateway: &dyn RuntimeGateway,
    service_id: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<HealthCheckOutcome> {
    let deadline = Instant::now() + timeout;
    let mut last_status = HealthStatus::Unknown;

    loop {
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(HealthCheckOutcome::Cancelled { last_status }),
            _ = time::sleep_until(deadline) => return Ok(HealthCheckOutcome::Timeout { last_status }),
            status = gateway.health_status(service_id, cancel) => status?,
        };

        last_status = status;
        if status.is_ready() {
            return Ok(HealthCheckOutcome::Healthy(service_id.to_string()));
        }
        debug!(service_id, %status, "service not ready yet");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(HealthCheckOutcome::Cancelled { last_status }),
            _ = time::sleep_until(deadline) => return Ok(HealthCheckOutcome::Timeout { last_status }),
            _ = time::sleep(POLL_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeGateway;
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn returns_immediately_when_running() {
        let gateway = FakeGateway::new();
        gateway.script_health("svc", [HealthStatus::Running]);

        let outcome = ensure_healthy(&gateway, "svc", DEFAULT_HEALTH_TIMEOUT, &CancellationToken::new())
            .await
            .expect("no gateway error");

        assert_eq!(outcome, HealthCheckOutcome::Healthy("svc".to_string()));
        assert_eq!(gateway.health_polls("svc"), 1);
    }

    #[tokio::test]
    async fn unknown_is_not_terminal() {
        let gateway = FakeGateway::new();
        gateway.script_health(
            "svc",
            [HealthStatus::Unknown, HealthStatus::Unknown, HealthStatus::Healthy],
        );

        let started = StdInstant::now();
        let outcome = ensure_healthy(&gateway, "svc", DEFAULT_HEALTH_TIMEOUT, &CancellationToken::new())
            .await
            .expect("no gateway error");
        let elapsed = started.elapsed();

        assert_eq!(outcome, HealthCheckOutcome::Healthy("svc".to_string()));
        assert_eq!(gateway.health_polls("svc"), 3);
        assert!(elapsed >= POLL_INTERVAL, "{elapsed:?}");
        assert!(elapsed < DEFAULT_HEALTH_TIMEOUT, "{elapsed:?}");
    }

    #[tokio::test]
    async fn unhealthy_times_out_with_last_status() {
        let gateway = FakeGateway::new();
        gateway.script_health("svc", [HealthStatus::Unhealthy]);

        let outcome = ensure_healthy(
            &gateway,
            "svc",
            Duration::from_millis(200),
            &CancellationToken::new(),
        )
        .await
        .expect("no gateway error");

        assert_eq!(
            outcome,
            HealthCheckOutcome::Timeout {
                last_status: HealthStatus::Unhealthy
            }
        );
    }

    #[tokio::test]
    async fn caller_cancellation_is_distinguished_from_timeout() {
        let gateway = FakeGateway::new();
        gateway.script_health("svc", [HealthStatus::Unknown]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = ensure_healthy(&gateway, "svc", DEFAULT_HEALTH_TIMEOUT, &cancel)
            .await
            .expect("no gateway error");

        assert!(matches!(outcome, HealthCheckOutcome::Cancelled { .. }));
        assert!(gateway.removed_services().is_empty());
    }
}
