use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::traits::{CommandContext, CommandHandler, CommandParser, DispatchResult, InboundMessage};
use crate::channels::{Channel, Color, Reply};

/// Routes parsed commands to handlers by name.
pub struct CommandDispatcher {
    parser: Box<dyn CommandParser>,
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandDispatcher {
    pub fn new(parser: Box<dyn CommandParser>, handlers: Vec<Arc<dyn CommandHandler>>) -> Self {
        let mut by_name = HashMap::new();
        for handler in handlers {
            let name = handler.command().to_string();
            if by_name.insert(name.clone(), handler).is_some() {
                tracing::warn!(command = %name, "duplicate command handler, last one wins");
            }
        }
        Self {
            parser,
            handlers: by_name,
        }
    }

    /// Registered `(command, description)` pairs, sorted by command.
    pub fn commands(&self) -> Vec<(String, String)> {
        let mut commands: Vec<(String, String)> = self
            .handlers
            .values()
            .map(|h| (h.command().to_string(), h.description().to_string()))
            .collect();
        commands.sort();
        commands
    }

    /// Run the handler for one message. Handler failures are logged and
    /// answered with a short notice; they never propagate.
    pub async fn dispatch(&self, message: &InboundMessage, context: &CommandContext) -> DispatchResult {
        let Some(parsed) = self.parser.parse(&message.content) else {
            return DispatchResult::Ignored;
        };
        let Some(handler) = self.handlers.get(&parsed.name) else {
            tracing::debug!(command = %parsed.name, sender = %message.sender, "unknown command");
            return DispatchResult::Unknown {
                command: parsed.name,
            };
        };

        tracing::info!(
            command = %parsed.name,
            sender = %message.sender,
            channel = %message.channel,
            "running command"
        );
        match handler.execute(&parsed.args, context).await {
            Ok(()) => DispatchResult::Handled {
                command: parsed.name,
            },
            Err(e) => {
                tracing::error!(command = %parsed.name, sender = %message.sender, "command failed: {e:#}");
                let notice = Reply::embed("Something went wrong")
                    .with_color(Color::Red)
                    .with_description(format!(
                        "`{}{}` failed. Try again in a bit.",
                        self.parser.prefix(),
                        parsed.name
                    ));
                if let Err(send_err) = context.notifier.emit(&notice).await {
                    tracing::warn!("failed to report command failure: {send_err:#}");
                }
                DispatchResult::Failed {
                    command: parsed.name,
                    error: format!("{e:#}"),
                }
            }
        }
    }

    /// Consume inbound messages until the channel closes, one task per message
    /// so a slow start/stop never holds up other commands. Returns once every
    /// spawned command has finished.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<InboundMessage>, channel: Arc<dyn Channel>) {
        let mut in_flight = JoinSet::new();
        while let Some(message) = rx.recv().await {
            let context = CommandContext {
                sender: message.sender.clone(),
                channel: message.channel.clone(),
                notifier: channel.notifier_for(&message.channel),
                directory: channel.directory(),
            };
            let dispatcher = Arc::clone(&self);
            in_flight.spawn(async move {
                dispatcher.dispatch(&message, &context).await;
            });
            while let Some(done) = in_flight.try_join_next() {
                if let Err(e) = done {
                    tracing::error!("command task panicked: {e}");
                }
            }
        }
        tracing::info!(channel = channel.name(), pending = in_flight.len(), "inbound stream closed");
        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                tracing::error!("command task panicked: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auto_reply::parser::PrefixCommandParser;
    use crate::test_support::RecordingNotifier;
    use anyhow::Result;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl CommandHandler for Echo {
        fn command(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Repeat the arguments"
        }

        async fn execute(&self, args: &[String], context: &CommandContext) -> Result<()> {
            context.notifier.emit(&Reply::text(args.join(" "))).await?;
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl CommandHandler for Broken {
        fn command(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        async fn execute(&self, _args: &[String], _context: &CommandContext) -> Result<()> {
            anyhow::bail!("boom")
        }
    }

    fn dispatcher() -> CommandDispatcher {
        let handlers: Vec<Arc<dyn CommandHandler>> = vec![Arc::new(Echo), Arc::new(Broken)];
        CommandDispatcher::new(Box::new(PrefixCommandParser::new("!")), handlers)
    }

    fn context(notifier: &Arc<RecordingNotifier>) -> CommandContext {
        CommandContext {
            sender: "summoner".to_string(),
            channel: "general".to_string(),
            notifier: notifier.clone(),
            directory: notifier.clone(),
        }
    }

    fn message(content: &str) -> InboundMessage {
        InboundMessage {
            id: "1".to_string(),
            sender: "summoner".to_string(),
            sender_id: 1,
            content: content.to_string(),
            channel: "general".to_string(),
            guild_id: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn dispatch_runs_matching_handler() {
        let notifier = Arc::new(RecordingNotifier::new());
        let result = dispatcher()
            .dispatch(&message("!echo hi there"), &context(&notifier))
            .await;

        assert_eq!(
            result,
            DispatchResult::Handled {
                command: "echo".to_string()
            }
        );
        assert_eq!(notifier.descriptions(), vec!["hi there"]);
    }

    #[tokio::test]
    async fn plain_message_is_ignored() {
        let notifier = Arc::new(RecordingNotifier::new());
        let result = dispatcher()
            .dispatch(&message("good morning"), &context(&notifier))
            .await;
        assert_eq!(result, DispatchResult::Ignored);
        assert!(notifier.replies().is_empty());
    }

    #[tokio::test]
    async fn unknown_command_is_reported_not_answered() {
        let notifier = Arc::new(RecordingNotifier::new());
        let result = dispatcher()
            .dispatch(&message("!genius 3"), &context(&notifier))
            .await;
        assert_eq!(
            result,
            DispatchResult::Unknown {
                command: "genius".to_string()
            }
        );
        assert!(notifier.replies().is_empty());
    }

    #[tokio::test]
    async fn handler_failure_is_isolated_and_announced() {
        let notifier = Arc::new(RecordingNotifier::new());
        let result = dispatcher()
            .dispatch(&message("!broken"), &context(&notifier))
            .await;

        assert!(matches!(result, DispatchResult::Failed { ref error, .. } if error == "boom"));
        assert!(notifier.saw("`!broken` failed"));
    }

    #[test]
    fn commands_are_listed_sorted() {
        let names: Vec<String> = dispatcher().commands().into_iter().map(|(c, _)| c).collect();
        assert_eq!(names, vec!["broken", "echo"]);
    }
}
