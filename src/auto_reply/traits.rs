use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::channels::{GuildDirectory, Notifier};

/// A command name plus its whitespace-separated arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
}

pub trait CommandParser: Send + Sync {
    /// `None` when the text is not a command.
    fn parse(&self, text: &str) -> Option<ParsedCommand>;
    fn prefix(&self) -> &str;
    fn name(&self) -> &str;
}

/// Everything a handler needs to answer the message that invoked it.
#[derive(Clone)]
pub struct CommandContext {
    pub sender: String,
    pub channel: String,
    pub notifier: Arc<dyn Notifier>,
    pub directory: Arc<dyn GuildDirectory>,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn command(&self) -> &str;
    fn description(&self) -> &str;
    async fn execute(&self, args: &[String], context: &CommandContext) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub sender: String,
    pub sender_id: u64,
    pub content: String,
    pub channel: String,
    pub guild_id: Option<u64>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchResult {
    /// A handler ran to completion.
    Handled { command: String },
    /// A handler ran and failed; the failure was reported to the channel.
    Failed { command: String, error: String },
    /// Prefixed text that matched no handler.
    Unknown { command: String },
    /// Not a command.
    Ignored,
}
