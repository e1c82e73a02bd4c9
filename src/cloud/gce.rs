//! Compute Engine backend speaking the `compute/v1` REST API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use super::traits::{
    GatewayError, InstanceGateway, InstanceInfo, InstanceRef, InstanceStatus, OperationHandle,
    OperationStatus,
};

pub const DEFAULT_COMPUTE_URL: &str = "https://compute.googleapis.com/compute/v1";

/// Gateway for one set of Compute Engine credentials.
///
/// The bearer token is taken as given; minting and refreshing it is left to
/// whoever runs the bot (`gcloud auth print-access-token`, workload identity).
pub struct GceGateway {
    base_url: String,
    access_token: Option<String>,
    client: Client,
}

impl GceGateway {
    pub fn new(base_url: &str, access_token: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.map(ToString::to_string),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn instance_url(&self, target: &InstanceRef) -> String {
        format!(
            "{}/projects/{}/zones/{}/instances/{}",
            self.base_url, target.project, target.zone, target.instance
        )
    }

    fn operation_url(&self, target: &InstanceRef, operation: &OperationHandle) -> String {
        format!(
            "{}/projects/{}/zones/{}/operations/{}",
            self.base_url, target.project, target.zone, operation
        )
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.access_token.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn lifecycle_call(
        &self,
        target: &InstanceRef,
        action: &str,
    ) -> Result<OperationHandle, GatewayError> {
        let url = format!("{}/{action}", self.instance_url(target));
        let response = self.authorized(self.client.post(&url)).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(rejected(status, &body));
        }
        let op = parse_operation(&body)?;
        // Immediate failures come back as an operation that already carries an error.
        if let Some(message) = op.error {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        tracing::debug!(instance = %target, action, op = %op.name, "compute operation accepted");
        Ok(OperationHandle(op.name))
    }
}

#[async_trait]
impl InstanceGateway for GceGateway {
    async fn start(&self, target: &InstanceRef) -> Result<OperationHandle, GatewayError> {
        self.lifecycle_call(target, "start").await
    }

    async fn stop(&self, target: &InstanceRef) -> Result<OperationHandle, GatewayError> {
        self.lifecycle_call(target, "stop").await
    }

    async fn operation_status(
        &self,
        target: &InstanceRef,
        operation: &OperationHandle,
    ) -> Result<OperationStatus, GatewayError> {
        let url = self.operation_url(target, operation);
        let response = self.authorized(self.client.get(&url)).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(rejected(status, &body));
        }
        let op = parse_operation(&body)?;
        Ok(OperationStatus {
            done: op.status.eq_ignore_ascii_case("DONE"),
            error: op.error,
        })
    }

    async fn get_instance(
        &self,
        target: &InstanceRef,
    ) -> Result<Option<InstanceInfo>, GatewayError> {
        let url = self.instance_url(target);
        let response = self.authorized(self.client.get(&url)).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(rejected(status, &body));
        }
        parse_instance(&body)
    }

    fn name(&self) -> &str {
        "gce"
    }
}

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiOperation {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<ApiOperationError>,
}

#[derive(Debug, Deserialize)]
struct ApiOperationError {
    #[serde(default)]
    errors: Vec<ApiErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorItem {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInstance {
    status: String,
    #[serde(default)]
    network_interfaces: Vec<ApiNetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiNetworkInterface {
    #[serde(default)]
    access_configs: Vec<ApiAccessConfig>,
}

#[derive(Debug, Deserialize)]
struct ApiAccessConfig {
    #[serde(default, rename = "natIP")]
    nat_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

struct ParsedOperation {
    name: String,
    status: String,
    error: Option<String>,
}

fn parse_operation(body: &str) -> Result<ParsedOperation, GatewayError> {
    let op: ApiOperation =
        serde_json::from_str(body).map_err(|e| GatewayError::Decode(e.to_string()))?;
    let error = op
        .error
        .and_then(|e| e.errors.into_iter().next())
        .map(|item| item.message);
    Ok(ParsedOperation {
        name: op.name,
        status: op.status,
        error,
    })
}

fn parse_instance(body: &str) -> Result<Option<InstanceInfo>, GatewayError> {
    let instance: ApiInstance =
        serde_json::from_str(body).map_err(|e| GatewayError::Decode(e.to_string()))?;
    let status = InstanceStatus::parse(&instance.status).ok_or_else(|| {
        GatewayError::Decode(format!("unknown instance status '{}'", instance.status))
    })?;
    let address = instance
        .network_interfaces
        .into_iter()
        .flat_map(|nic| nic.access_configs)
        .find_map(|cfg| cfg.nat_ip);
    Ok(Some(InstanceInfo { status, address }))
}

fn rejected(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|env| env.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| crate::util::sanitize_api_error(body));
    GatewayError::Rejected {
        status: status.as_u16(),
        message,
    }
}
