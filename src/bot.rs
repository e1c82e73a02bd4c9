//! Wires configuration into running services and drives one channel until
//! it closes or the process is interrupted.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auto_reply;
use crate::channels::Channel;
use crate::config::Config;
use crate::infra::{self, Scheduler};
use crate::ledger::{self, UsageLedger};
use crate::lifecycle::{self, ControllerDeps, ServerController};

const INBOUND_QUEUE: usize = 64;

/// Long-lived services shared by every command.
pub struct Services {
    pub ledger: Arc<dyn UsageLedger>,
    pub scheduler: Arc<Scheduler>,
    pub controllers: Vec<Arc<ServerController>>,
    pub cancel: CancellationToken,
}

impl Services {
    pub fn build(config: &Config) -> Result<Self> {
        let ledger = ledger::create_ledger(&config.ledger, &config.data_dir)?;
        let scheduler = infra::create_scheduler();
        let cancel = CancellationToken::new();
        let deps = ControllerDeps {
            ledger: Arc::clone(&ledger),
            scheduler: Arc::clone(&scheduler),
            clock: infra::create_clock(),
            timezone: config.ledger.reference_timezone()?,
            poll_interval: Duration::from_secs(config.compute.poll_interval_secs),
            progress: config.compute.progress,
            cancel: cancel.clone(),
        };
        let controllers = lifecycle::create_controllers(config, &deps);
        tracing::info!(
            ledger = ledger.name(),
            servers = controllers.len(),
            timezone = %deps.timezone,
            "services ready"
        );
        Ok(Self {
            ledger,
            scheduler,
            controllers,
            cancel,
        })
    }

    /// Interrupt operation waits and disarm every usage tick.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.scheduler.shutdown().await;
    }
}

/// Serve commands from `channel` until it closes or Ctrl-C.
pub async fn run(config: Config, channel: Arc<dyn Channel>) -> Result<()> {
    let services = Services::build(&config)?;
    serve(&config, &services, channel, shutdown_signal()).await;
    services.shutdown().await;
    tracing::info!("summonbot stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn serve(
    config: &Config,
    services: &Services,
    channel: Arc<dyn Channel>,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let dispatcher = Arc::new(auto_reply::create_dispatcher(
        &config.bot.command_prefix,
        &services.controllers,
    ));
    let (tx, rx) = mpsc::channel(INBOUND_QUEUE);

    let listener = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move {
            if let Err(e) = channel.listen(tx).await {
                tracing::error!(channel = channel.name(), "channel stopped: {e:#}");
            }
        })
    };
    let mut dispatch = tokio::spawn(Arc::clone(&dispatcher).run(rx, Arc::clone(&channel)));

    tracing::info!(
        channel = channel.name(),
        prefix = %config.bot.command_prefix,
        commands = dispatcher.commands().len(),
        "listening for commands"
    );

    tokio::select! {
        _ = &mut dispatch => tracing::debug!("dispatcher drained"),
        () = shutdown => {}
    }
    listener.abort();
    dispatch.abort();
}
