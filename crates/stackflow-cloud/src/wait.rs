//! Readiness polling with bounded exponential backoff

use crate::config::WaitConfig;
use crate::descriptor::ResourceKind;
use crate::error::{CloudError, Result};
use crate::gateway::{ProviderGateway, Readiness};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Poll `describe` until the resource is ready or `timeout` elapses.
///
/// Provider errors during polling end the wait with that error; a timeout
/// yields [`CloudError::Timeout`], which the engine treats as transient.
pub async fn wait_until_ready(
    gateway: &dyn ProviderGateway,
    kind: ResourceKind,
    physical_id: &str,
    config: &WaitConfig,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;

    loop {
        match gateway.describe(kind, physical_id).await? {
            Readiness::Ready => {
                tracing::debug!(%kind, physical_id, polls = attempt + 1, "Resource ready");
                return Ok(());
            }
            Readiness::Failed(reason) => {
                return Err(CloudError::PermanentProvider(format!(
                    "{kind} '{physical_id}' failed to become ready: {reason}"
                )));
            }
            Readiness::Pending => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(CloudError::Timeout(format!(
                "{kind} '{physical_id}' not ready after {timeout:?}"
            )));
        }

        let delay = config.delay_for_attempt(attempt).min(deadline - now);
        tracing::debug!(
            %kind,
            physical_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Resource not ready, retrying"
        );
        sleep(delay).await;
        attempt += 1;
    }
}
