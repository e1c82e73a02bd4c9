use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::traits::{CommandContext, CommandHandler};
use crate::channels::Reply;
use crate::lifecycle::{LifecycleError, ServerController};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    Start,
    Stop,
    Status,
}

impl ServerAction {
    pub const ALL: [Self; 3] = [Self::Start, Self::Stop, Self::Status];

    fn suffix(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Status => "status",
        }
    }
}

/// `<prefix>start`, `<prefix>stop` or `<prefix>status` for one server.
pub struct ServerCommand {
    controller: Arc<ServerController>,
    action: ServerAction,
    command: String,
    description: String,
}

impl ServerCommand {
    pub fn new(controller: Arc<ServerController>, action: ServerAction) -> Self {
        let server = controller.server();
        let command = format!("{}{}", server.command_prefix, action.suffix());
        let description = match action {
            ServerAction::Start => format!("Start the {} server", server.name),
            ServerAction::Stop => format!("Stop the {} server", server.name),
            ServerAction::Status => format!("Get the status of the {} server", server.name),
        };
        Self {
            controller,
            action,
            command,
            description,
        }
    }

    /// All three commands for `controller`.
    pub fn all_for(controller: &Arc<ServerController>) -> Vec<Self> {
        ServerAction::ALL
            .into_iter()
            .map(|action| Self::new(Arc::clone(controller), action))
            .collect()
    }

    fn failure(&self, error: &LifecycleError) -> Reply {
        self.controller.failure_reply(error)
    }
}

#[async_trait]
impl CommandHandler for ServerCommand {
    fn command(&self) -> &str {
        &self.command
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, _args: &[String], context: &CommandContext) -> Result<()> {
        let result = match self.action {
            ServerAction::Start => self
                .controller
                .start(Arc::clone(&context.notifier), Arc::clone(&context.directory))
                .await
                .map(|_| ()),
            ServerAction::Stop => self
                .controller
                .stop(context.notifier.as_ref())
                .await
                .map(|_| ()),
            ServerAction::Status => match self.controller.status_report().await {
                Ok(report) => {
                    context.notifier.emit(&report).await?;
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };

        // Lifecycle refusals are expected outcomes: answer them in the server's
        // embed instead of the generic failure notice.
        if let Err(e) = result {
            tracing::info!(
                server = %self.controller.server().name,
                command = %self.command,
                "{e}"
            );
            context.notifier.emit(&self.failure(&e)).await?;
        }
        Ok(())
    }
}
