//! Quota-guarded start/stop for one managed server.

use chrono_tz::Tz;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::status::status_reply;
use super::types::{LifecycleError, ManagedServer, QuotaPolicy, ServerState};
use crate::channels::{Color, GuildDirectory, Notifier, Reply};
use crate::cloud::{GatewayError, InstanceGateway, OperationHandle, OperationPoller, PollOutcome};
use crate::config::ProgressMode;
use crate::infra::{Clock, JobCallback, Scheduler};
use crate::ledger::{UsageLedger, UsageRecord};

/// Collaborators shared by every controller.
#[derive(Clone)]
pub struct ControllerDeps {
    pub ledger: Arc<dyn UsageLedger>,
    pub scheduler: Arc<Scheduler>,
    pub clock: Arc<dyn Clock>,
    pub timezone: Tz,
    pub poll_interval: Duration,
    pub progress: ProgressMode,
    /// Interrupts operation waits; cancelled on shutdown.
    pub cancel: CancellationToken,
}

/// Drives one server through `Idle`, `Running` and `Capped`.
///
/// Start, stop and the usage tick all hold `lifecycle` for their whole
/// sequence, so a tick never interleaves with a manual command.
pub struct ServerController {
    server: ManagedServer,
    gateway: Arc<dyn InstanceGateway>,
    deps: ControllerDeps,
    lifecycle: tokio::sync::Mutex<()>,
    state: Mutex<ServerState>,
}

impl ServerController {
    pub fn new(server: ManagedServer, gateway: Arc<dyn InstanceGateway>, deps: ControllerDeps) -> Self {
        Self {
            server,
            gateway,
            deps,
            lifecycle: tokio::sync::Mutex::new(()),
            state: Mutex::new(ServerState::Idle),
        }
    }

    pub fn server(&self) -> &ManagedServer {
        &self.server
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    pub fn is_tick_armed(&self) -> bool {
        self.deps.scheduler.is_armed(&self.server.tick_job_id())
    }

    /// Check the quota, start the instance, wait for it and arm the usage tick.
    ///
    /// Progress and the final "Server started!" plus status report go to
    /// `notifier`; later quota warnings go there too.
    pub async fn start(
        self: &Arc<Self>,
        notifier: Arc<dyn Notifier>,
        directory: Arc<dyn GuildDirectory>,
    ) -> Result<ServerState, LifecycleError> {
        let _guard = self.lifecycle.lock().await;

        if let Some(quota) = &self.server.quota {
            let minutes = self.minutes_today(quota).await?;
            if minutes >= quota.daily_cap_minutes {
                self.set_state(ServerState::Capped);
                tracing::info!(
                    server = %self.server.name,
                    minutes,
                    cap = quota.daily_cap_minutes,
                    "start rejected, daily cap reached"
                );
                return Err(LifecycleError::QuotaExceeded {
                    cap_minutes: quota.daily_cap_minutes,
                });
            }
        }

        let template = self.template();
        let operation = self.gateway.start(&self.server.target).await.map_err(|e| {
            tracing::warn!(server = %self.server.name, "start rejected by provider: {e}");
            e
        })?;
        let elapsed = self
            .await_operation(&operation, notifier.as_ref(), &template, "Starting server")
            .await?;

        if let Some(quota) = &self.server.quota {
            self.arm_tick(quota, Arc::clone(&notifier), directory);
        }
        self.set_state(ServerState::Running);
        tracing::info!(
            server = %self.server.name,
            op = %operation,
            elapsed_secs = elapsed.as_secs(),
            "server started"
        );

        announce(notifier.as_ref(), &template.with_description("Server started!")).await;
        match self.status_report().await {
            Ok(report) => announce(notifier.as_ref(), &report).await,
            Err(e) => tracing::warn!(server = %self.server.name, "status after start failed: {e}"),
        }
        Ok(ServerState::Running)
    }

    /// Disarm the usage tick, stop the instance and wait for it.
    pub async fn stop(&self, notifier: &dyn Notifier) -> Result<ServerState, LifecycleError> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked(notifier, ServerState::Idle).await
    }

    /// Current instance status as a reply embed.
    pub async fn status_report(&self) -> Result<Reply, LifecycleError> {
        let info = self.gateway.get_instance(&self.server.target).await?;
        Ok(status_reply(&self.server.title, info.as_ref()))
    }

    /// One minute of usage. A tick whose token was cancelled while it waited
    /// for the lifecycle lock does nothing.
    pub async fn tick(
        &self,
        token: &CancellationToken,
        notifier: &dyn Notifier,
        directory: &dyn GuildDirectory,
    ) {
        let _guard = self.lifecycle.lock().await;
        if token.is_cancelled() {
            tracing::debug!(server = %self.server.name, "usage tick superseded");
            return;
        }
        if let Err(e) = self.tick_locked(notifier, directory).await {
            tracing::warn!(server = %self.server.name, "usage tick failed: {e}");
        }
    }

    async fn tick_locked(
        &self,
        notifier: &dyn Notifier,
        directory: &dyn GuildDirectory,
    ) -> Result<(), LifecycleError> {
        let Some(quota) = &self.server.quota else {
            return Ok(());
        };

        let next = self.minutes_today(quota).await?.saturating_add(1);

        if let Some(remaining) = quota.warning_at(next) {
            let audience = audience(quota, directory).await;
            announce(
                notifier,
                &Reply::text(format!(
                    "{audience}, you have {remaining} minutes of playtime remaining."
                )),
            )
            .await;
        }

        if next >= quota.daily_cap_minutes {
            let audience = audience(quota, directory).await;
            announce(notifier, &Reply::text(format!("{audience}, stopping the server now."))).await;

            let capped = UsageRecord {
                minutes_played: quota.daily_cap_minutes,
                last_reset_date: self.deps.clock.today(self.deps.timezone),
            };
            self.deps
                .ledger
                .set(&quota.ledger_key, &capped)
                .await
                .map_err(|e| LifecycleError::ledger(&e))?;
            tracing::info!(
                server = %self.server.name,
                cap = quota.daily_cap_minutes,
                "daily cap reached, forcing stop"
            );
            if let Err(e) = self.stop_locked(notifier, ServerState::Capped).await {
                announce(notifier, &self.failure_reply(&e)).await;
                return Err(e);
            }
            return Ok(());
        }

        self.deps
            .ledger
            .increment(&quota.ledger_key, 1)
            .await
            .map_err(|e| LifecycleError::ledger(&e))?;
        tracing::debug!(server = %self.server.name, minutes = next, "usage recorded");
        Ok(())
    }

    async fn stop_locked(
        &self,
        notifier: &dyn Notifier,
        end_state: ServerState,
    ) -> Result<ServerState, LifecycleError> {
        self.disarm_tick();

        let template = self.template();
        let operation = self.gateway.stop(&self.server.target).await.map_err(|e| {
            tracing::warn!(server = %self.server.name, "stop rejected by provider: {e}");
            e
        })?;
        let elapsed = self
            .await_operation(&operation, notifier, &template, "Stopping server")
            .await?;

        self.set_state(end_state);
        tracing::info!(
            server = %self.server.name,
            op = %operation,
            elapsed_secs = elapsed.as_secs(),
            state = %end_state,
            "server stopped"
        );
        announce(notifier, &template.with_description("Server stopped.")).await;
        Ok(end_state)
    }

    /// Minutes played today, writing a fresh record first if the stored one
    /// is missing or from an earlier day.
    async fn minutes_today(&self, quota: &QuotaPolicy) -> Result<u32, LifecycleError> {
        let today = self.deps.clock.today(self.deps.timezone);
        let key = quota.ledger_key.as_str();
        let existing = self
            .deps
            .ledger
            .get(key)
            .await
            .map_err(|e| LifecycleError::ledger(&e))?;

        match existing {
            Some(record) if !record.is_stale(today) => Ok(record.minutes_played),
            previous => {
                self.deps
                    .ledger
                    .set(key, &UsageRecord::fresh(today))
                    .await
                    .map_err(|e| LifecycleError::ledger(&e))?;
                match previous {
                    Some(old) => tracing::info!(
                        server = %self.server.name,
                        previous_day = %old.last_reset_date,
                        %today,
                        "usage reset for a new day"
                    ),
                    None => tracing::info!(server = %self.server.name, %today, "usage record created"),
                }
                Ok(0)
            }
        }
    }

    async fn await_operation(
        &self,
        operation: &OperationHandle,
        notifier: &dyn Notifier,
        template: &Reply,
        label: &str,
    ) -> Result<Duration, LifecycleError> {
        let poller =
            OperationPoller::new(self.gateway.as_ref(), self.deps.poll_interval, self.deps.progress);
        let outcome = poller
            .wait(
                &self.server.target,
                operation,
                notifier,
                template,
                label,
                &self.deps.cancel,
            )
            .await?;

        match outcome {
            PollOutcome::Done {
                elapsed,
                error: None,
            } => Ok(elapsed),
            PollOutcome::Done {
                error: Some(message),
                ..
            } => {
                tracing::warn!(server = %self.server.name, op = %operation, "operation failed: {message}");
                Err(GatewayError::OperationFailed(message).into())
            }
            PollOutcome::Cancelled => Err(LifecycleError::Cancelled),
        }
    }

    fn arm_tick(
        self: &Arc<Self>,
        quota: &QuotaPolicy,
        notifier: Arc<dyn Notifier>,
        directory: Arc<dyn GuildDirectory>,
    ) {
        // Weak: the scheduler must not keep a controller alive.
        let controller = Arc::downgrade(self);
        let callback: JobCallback = Arc::new(move |token| {
            let controller = controller.clone();
            let notifier = Arc::clone(&notifier);
            let directory = Arc::clone(&directory);
            Box::pin(async move {
                if let Some(controller) = controller.upgrade() {
                    controller
                        .tick(&token, notifier.as_ref(), directory.as_ref())
                        .await;
                }
            })
        });
        self.deps
            .scheduler
            .schedule_recurring(&self.server.tick_job_id(), quota.tick_interval, callback);
    }

    fn disarm_tick(&self) {
        if self.server.quota.is_some() {
            self.deps.scheduler.cancel(&self.server.tick_job_id());
        }
    }

    /// A lifecycle error as a red embed titled with the server.
    pub fn failure_reply(&self, error: &LifecycleError) -> Reply {
        Reply::embed(&self.server.title)
            .with_color(Color::Red)
            .with_description(error.to_string())
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock() = state;
    }

    fn template(&self) -> Reply {
        Reply::embed(&self.server.title).with_color(Color::Green)
    }
}

/// Role mention for quota notices, or the fallback label when the role is missing.
async fn audience(quota: &QuotaPolicy, directory: &dyn GuildDirectory) -> String {
    match directory.role_mention(&quota.notify_role).await {
        Ok(Some(mention)) => mention,
        Ok(None) => quota.fallback_audience.clone(),
        Err(e) => {
            tracing::warn!(role = %quota.notify_role, "role lookup failed: {e:#}");
            quota.fallback_audience.clone()
        }
    }
}

async fn announce(notifier: &dyn Notifier, reply: &Reply) {
    if let Err(e) = notifier.emit(reply).await {
        tracing::warn!(notifier = notifier.name(), "failed to deliver message: {e:#}");
    }
}
