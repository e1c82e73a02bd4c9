pub mod commands;
pub mod dispatcher;
pub mod parser;
pub mod server;
pub mod traits;

pub use commands::{HelpCommand, KillCommand, SummonCommand};
pub use dispatcher::CommandDispatcher;
pub use parser::{mention_user_id, PrefixCommandParser};
pub use server::{ServerAction, ServerCommand};
pub use traits::{
    CommandContext, CommandHandler, CommandParser, DispatchResult, InboundMessage, ParsedCommand,
};

use std::sync::Arc;

use crate::lifecycle::ServerController;

pub fn create_command_parser(prefix: &str) -> Box<dyn CommandParser> {
    Box::new(PrefixCommandParser::new(prefix))
}

/// Factory: the full command set, with server commands for every controller.
pub fn create_dispatcher(prefix: &str, controllers: &[Arc<ServerController>]) -> CommandDispatcher {
    let server_commands: Vec<ServerCommand> =
        controllers.iter().flat_map(ServerCommand::all_for).collect();
    let help_entries = server_commands
        .iter()
        .map(|c| (c.command().to_string(), c.description().to_string()))
        .collect();

    let mut handlers: Vec<Arc<dyn CommandHandler>> = vec![
        Arc::new(HelpCommand::new(prefix, help_entries)),
        Arc::new(SummonCommand),
        Arc::new(KillCommand),
    ];
    handlers.extend(
        server_commands
            .into_iter()
            .map(|c| Arc::new(c) as Arc<dyn CommandHandler>),
    );

    CommandDispatcher::new(create_command_parser(prefix), handlers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_without_servers_has_social_commands() {
        let names: Vec<String> = create_dispatcher("!", &[])
            .commands()
            .into_iter()
            .map(|(c, _)| c)
            .collect();
        assert_eq!(names, vec!["kill", "summon", "summon_bot"]);
    }
}
