//! Cloud instance gateway: start, stop and poll game-server VMs.

pub mod gce;
pub mod poller;
pub mod traits;

pub use gce::GceGateway;
pub use poller::{OperationPoller, PollOutcome};
pub use traits::{
    GatewayError, InstanceGateway, InstanceInfo, InstanceRef, InstanceStatus, OperationHandle,
    OperationStatus,
};

use crate::config::{ComputeConfig, ServerConfig};
use std::sync::Arc;

/// Factory: one gateway per managed server, since each server may live in a
/// project with its own credentials.
pub fn create_gateway(compute: &ComputeConfig, server: &ServerConfig) -> Arc<dyn InstanceGateway> {
    Arc::new(GceGateway::new(
        &compute.api_url,
        server.access_token.as_deref(),
    ))
}
