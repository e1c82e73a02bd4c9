//! Waits for a start/stop operation to finish while reporting progress.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::traits::{GatewayError, InstanceGateway, InstanceRef, OperationHandle};
use crate::channels::{MessageRef, Notifier, Reply};
use crate::config::ProgressMode;

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The operation reached `DONE`; `error` is set if it finished unsuccessfully.
    Done {
        elapsed: Duration,
        error: Option<String>,
    },
    /// The cancellation token fired before the operation finished.
    Cancelled,
}

/// Polls one gateway at a fixed interval.
pub struct OperationPoller<'a> {
    gateway: &'a dyn InstanceGateway,
    interval: Duration,
    mode: ProgressMode,
}

impl<'a> OperationPoller<'a> {
    pub fn new(gateway: &'a dyn InstanceGateway, interval: Duration, mode: ProgressMode) -> Self {
        Self {
            gateway,
            interval,
            mode,
        }
    }

    /// Block the calling command (not the runtime) until `operation` is done.
    ///
    /// Every iteration that finds the operation unfinished reports
    /// `"<label>... (N seconds elapsed)"` using `template` for the embed
    /// fields. Progress delivery failures are logged and otherwise ignored.
    pub async fn wait(
        &self,
        target: &InstanceRef,
        operation: &OperationHandle,
        notifier: &dyn Notifier,
        template: &Reply,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, GatewayError> {
        let mut iteration: u64 = 0;
        let mut progress: Option<MessageRef> = None;

        loop {
            let status = self.gateway.operation_status(target, operation).await?;
            if status.done {
                let elapsed = self.interval.saturating_mul(saturating_u32(iteration));
                tracing::debug!(
                    instance = %target,
                    op = %operation,
                    elapsed_secs = elapsed.as_secs(),
                    "operation finished"
                );
                return Ok(PollOutcome::Done {
                    elapsed,
                    error: status.error,
                });
            }

            let elapsed_secs = iteration * self.interval.as_secs();
            let reply = template
                .clone()
                .with_description(format!("{label}... ({elapsed_secs} seconds elapsed)"));
            self.report(notifier, &mut progress, &reply).await;
            iteration += 1;

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!(instance = %target, op = %operation, "operation wait cancelled");
                    return Ok(PollOutcome::Cancelled);
                }
                () = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    async fn report(&self, notifier: &dyn Notifier, progress: &mut Option<MessageRef>, reply: &Reply) {
        let result = match (self.mode, progress.clone()) {
            (ProgressMode::Edit, Some(existing)) => notifier.edit(&existing, reply).await,
            _ => notifier.emit(reply).await.map(|sent| *progress = Some(sent)),
        };
        if let Err(e) = result {
            tracing::warn!(notifier = notifier.name(), "failed to deliver progress: {e:#}");
        }
    }
}

fn saturating_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
