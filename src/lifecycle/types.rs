use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cloud::{GatewayError, InstanceRef};
use crate::config::{QuotaConfig, ServerConfig};

/// Daily playtime cap for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub daily_cap_minutes: u32,
    pub tick_interval: Duration,
    /// Remaining-minute marks that trigger a warning.
    pub warn_at_remaining: Vec<u32>,
    pub notify_role: String,
    pub fallback_audience: String,
    pub ledger_key: String,
}

impl QuotaPolicy {
    pub fn from_config(server_name: &str, quota: &QuotaConfig) -> Self {
        Self {
            daily_cap_minutes: quota.daily_cap_minutes,
            tick_interval: Duration::from_secs(quota.tick_interval_secs),
            warn_at_remaining: quota.warn_at_remaining.clone(),
            notify_role: quota.notify_role.clone(),
            fallback_audience: quota.fallback_audience.clone(),
            ledger_key: quota
                .ledger_key
                .clone()
                .unwrap_or_else(|| server_name.to_string()),
        }
    }

    /// Minutes left after `next` minutes have been played, if that is a warning mark.
    pub fn warning_at(&self, next: u32) -> Option<u32> {
        if next >= self.daily_cap_minutes {
            return None;
        }
        let remaining = self.daily_cap_minutes - next;
        self.warn_at_remaining.contains(&remaining).then_some(remaining)
    }
}

/// A game server the bot can start and stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedServer {
    pub name: String,
    pub title: String,
    pub command_prefix: String,
    pub target: InstanceRef,
    pub quota: Option<QuotaPolicy>,
}

impl ManagedServer {
    pub fn from_config(server: &ServerConfig) -> Self {
        Self {
            name: server.name.clone(),
            title: server.title.clone(),
            command_prefix: server.command_prefix.clone(),
            target: server.instance_ref(),
            quota: server
                .quota
                .as_ref()
                .map(|q| QuotaPolicy::from_config(&server.name, q)),
        }
    }

    /// Scheduler id of this server's usage tick.
    pub fn tick_job_id(&self) -> String {
        format!("quota:{}", self.name)
    }
}

/// Where a server sits in its lifecycle, as far as the bot knows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Idle,
    Running,
    /// Today's playtime is used up.
    Capped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Capped => "capped",
        };
        f.write_str(s)
    }
}

/// Why a start or stop did not complete.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("You have reached the maximum time limit of {}.", describe_cap(.cap_minutes))]
    QuotaExceeded { cap_minutes: u32 },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("usage ledger unavailable: {0}")]
    Ledger(String),
    #[error("operation wait was cancelled")]
    Cancelled,
}

impl LifecycleError {
    pub(crate) fn ledger(err: &anyhow::Error) -> Self {
        Self::Ledger(format!("{err:#}"))
    }
}

/// "2 hours", "1 hour", or "90 minutes".
pub fn describe_cap(cap_minutes: &u32) -> String {
    match *cap_minutes {
        60 => "1 hour".to_string(),
        m if m % 60 == 0 => format!("{} hours", m / 60),
        1 => "1 minute".to_string(),
        m => format!("{m} minutes"),
    }
}
