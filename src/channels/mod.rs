pub mod cli;
pub mod discord;
pub mod traits;

pub use cli::CliChannel;
pub use discord::DiscordChannel;
pub use traits::{Channel, Color, GuildDirectory, MessageRef, Notifier, Reply};

use crate::config::BotConfig;
use std::sync::Arc;

/// Factory: the Discord channel for `bot`.
pub fn create_discord_channel(bot: &BotConfig) -> anyhow::Result<Arc<dyn Channel>> {
    Ok(Arc::new(DiscordChannel::new(bot)?))
}

pub fn create_cli_channel() -> Arc<dyn Channel> {
    Arc::new(CliChannel::new())
}
