//! Instance gateway traits and types for pluggable compute backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one virtual machine at the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    pub project: String,
    pub zone: String,
    pub instance: String,
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.zone, self.instance)
    }
}

/// Opaque handle of an in-flight start/stop operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OperationHandle(pub String);

impl OperationHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of an asynchronous operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationStatus {
    pub done: bool,
    /// First error message reported by a finished operation, if any.
    pub error: Option<String>,
}

/// Lifecycle status of a virtual machine as reported by the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Stopped,
    Suspending,
    Suspended,
    Repairing,
    Terminated,
}

impl InstanceStatus {
    /// Parse the provider's upper-case status string.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PROVISIONING" => Some(Self::Provisioning),
            "STAGING" => Some(Self::Staging),
            "RUNNING" => Some(Self::Running),
            "STOPPING" => Some(Self::Stopping),
            "STOPPED" => Some(Self::Stopped),
            "SUSPENDING" => Some(Self::Suspending),
            "SUSPENDED" => Some(Self::Suspended),
            "REPAIRING" => Some(Self::Repairing),
            "TERMINATED" => Some(Self::Terminated),
            _ => None,
        }
    }
}

/// Instance status plus its external address, when it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub status: InstanceStatus,
    pub address: Option<String>,
}

/// Failures reported by a compute backend.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The provider rejected the request (quota, permissions, bad state).
    #[error("{message}")]
    Rejected { status: u16, message: String },
    /// The request never got a usable answer.
    #[error("compute request failed: {0}")]
    Transport(String),
    /// The provider answered with something we could not read.
    #[error("unexpected compute response: {0}")]
    Decode(String),
    /// The operation ran to completion but reported an error.
    #[error("{0}")]
    OperationFailed(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Start/stop/poll access to virtual machines.
///
/// Implementations must be `Send + Sync`: one gateway is shared by the
/// command handlers and the background quota tick of its server.
#[async_trait]
pub trait InstanceGateway: Send + Sync {
    /// Ask the provider to start the instance. Returns once the request is
    /// accepted, not once the instance is up.
    async fn start(&self, target: &InstanceRef) -> Result<OperationHandle, GatewayError>;

    /// Ask the provider to stop the instance.
    async fn stop(&self, target: &InstanceRef) -> Result<OperationHandle, GatewayError>;

    /// Poll an operation previously returned by `start` or `stop`.
    async fn operation_status(
        &self,
        target: &InstanceRef,
        operation: &OperationHandle,
    ) -> Result<OperationStatus, GatewayError>;

    /// Current instance status, or `None` if the instance does not exist.
    async fn get_instance(&self, target: &InstanceRef)
        -> Result<Option<InstanceInfo>, GatewayError>;

    fn name(&self) -> &str;
}
