//! Game-server lifecycle: quota check, start/stop with operation polling,
//! and the per-minute usage tick that enforces the daily cap.

pub mod controller;
pub mod status;
pub mod types;

pub use controller::{ControllerDeps, ServerController};
pub use status::status_reply;
pub use types::{LifecycleError, ManagedServer, QuotaPolicy, ServerState};

use std::sync::Arc;

use crate::cloud;
use crate::config::Config;

/// Factory: one controller per configured server, each with its own gateway.
pub fn create_controllers(config: &Config, deps: &ControllerDeps) -> Vec<Arc<ServerController>> {
    config
        .servers
        .iter()
        .map(|server| {
            let gateway = cloud::create_gateway(&config.compute, server);
            tracing::debug!(
                server = %server.name,
                instance = %server.instance_ref(),
                gateway = gateway.name(),
                capped = server.quota.is_some(),
                "controller created"
            );
            Arc::new(ServerController::new(
                ManagedServer::from_config(server),
                gateway,
                deps.clone(),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProgressMode;
    use crate::infra::{create_clock, create_scheduler};
    use crate::ledger::InMemoryUsageLedger;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn factory_builds_one_controller_per_server() {
        let deps = ControllerDeps {
            ledger: Arc::new(InMemoryUsageLedger::new()),
            scheduler: create_scheduler(),
            clock: create_clock(),
            timezone: chrono_tz::Asia::Kolkata,
            poll_interval: Duration::from_secs(5),
            progress: ProgressMode::Each,
            cancel: CancellationToken::new(),
        };
        let controllers = create_controllers(&Config::default(), &deps);

        let names: Vec<&str> = controllers
            .iter()
            .map(|c| c.server().name.as_str())
            .collect();
        assert_eq!(names, vec!["minecraft", "factorio"]);
        assert!(controllers
            .iter()
            .all(|c| c.state() == ServerState::Idle));
    }
}
