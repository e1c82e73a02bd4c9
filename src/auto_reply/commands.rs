use anyhow::Result;
use async_trait::async_trait;
use rand::seq::SliceRandom;

use super::parser::mention_user_id;
use super::traits::{CommandContext, CommandHandler};
use crate::channels::{Color, Reply};

const KILL_GIFS: &[&str] = &[
    "https://media.giphy.com/media/xTcnTjeH5rtf6bdlwA/giphy.gif",
    "https://media.giphy.com/media/xUPGcdlIDdjwxbjrO0/giphy.gif",
    "https://media.giphy.com/media/yNFjQR6zKOGmk/giphy.gif",
];

fn fool_spotted(description: &str) -> Reply {
    Reply::embed("FOOL SPOTTED")
        .with_color(Color::Red)
        .with_description(description)
}

/// Whether `mention` names a member of the guild. A missing or malformed
/// mention is treated as a non-member.
async fn is_member(mention: Option<&String>, context: &CommandContext) -> Result<bool> {
    match mention.and_then(|m| mention_user_id(m)) {
        Some(id) => context.directory.is_member(id).await,
        None => Ok(false),
    }
}

/// `summon_bot`: how to use the bot.
pub struct HelpCommand {
    prefix: String,
    server_commands: Vec<(String, String)>,
}

impl HelpCommand {
    pub fn new(prefix: &str, server_commands: Vec<(String, String)>) -> Self {
        Self {
            prefix: prefix.to_string(),
            server_commands,
        }
    }

    fn render(&self) -> String {
        let p = &self.prefix;
        let mut text = [
            "Summon:".to_string(),
            format!("    - `{p}summon @username [mode]`"),
            "    - mode:".to_string(),
            "        - `0`: CALL (3 times) -> default".to_string(),
            "        - `1`: SHOUT (7 times)".to_string(),
            "        - `2`: SCREAM (15 times)".to_string(),
            format!("    - Frustrated? Just kill them: `{p}kill @username`"),
        ]
        .join("\n");
        text.push('\n');
        if !self.server_commands.is_empty() {
            text.push_str("\nServers:\n");
            for (command, description) in &self.server_commands {
                text.push_str(&format!("    - `{p}{command}`: {description}\n"));
            }
        }
        text
    }
}

#[async_trait]
impl CommandHandler for HelpCommand {
    fn command(&self) -> &str {
        "summon_bot"
    }

    fn description(&self) -> &str {
        "Show how to summon"
    }

    async fn execute(&self, _args: &[String], context: &CommandContext) -> Result<()> {
        let reply = Reply::embed("How to summon?")
            .with_color(Color::Green)
            .with_description(self.render());
        context.notifier.emit(&reply).await?;
        Ok(())
    }
}

/// Intensity of a summon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummonMode {
    Call,
    Shout,
    Scream,
}

impl SummonMode {
    /// `1` and `2` escalate; anything else is a plain call.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg.map(str::trim) {
            Some("1") => Self::Shout,
            Some("2") => Self::Scream,
            _ => Self::Call,
        }
    }

    pub fn repeat(self) -> usize {
        match self {
            Self::Call => 3,
            Self::Shout => 7,
            Self::Scream => 15,
        }
    }

    fn header(self) -> Reply {
        let (title, description, color) = match self {
            Self::Call => ("Mode: CALL", "Calling...", Color::Purple),
            Self::Shout => ("Mode: SHOUT", "SHOUTING...", Color::Orange),
            Self::Scream => ("Mode: SCREAM", "SCREAMING!!!", Color::Red),
        };
        Reply::embed(title)
            .with_color(color)
            .with_description(description)
    }

    fn lines(self) -> &'static [&'static str] {
        match self {
            Self::Call => &["Yo!", "Hey!", "Listen!"],
            Self::Shout => &["COME ONLINE!!!", "WAKE UP!!!", "REPLY ASAP!!!"],
            Self::Scream => &[
                "WHY AREN'T YOU ONLINE?",
                "WHAT IS THE MATTER WITH YOU?",
                "YOU ARE A HORRIBLE PERSON!",
            ],
        }
    }
}

/// `summon @user [mode]`: ping someone repeatedly.
pub struct SummonCommand;

#[async_trait]
impl CommandHandler for SummonCommand {
    fn command(&self) -> &str {
        "summon"
    }

    fn description(&self) -> &str {
        "Call a member 3, 7 or 15 times"
    }

    async fn execute(&self, args: &[String], context: &CommandContext) -> Result<()> {
        let mode = SummonMode::from_arg(args.get(1).map(String::as_str));
        context.notifier.emit(&mode.header()).await?;

        if !is_member(args.first(), context).await? {
            context
                .notifier
                .emit(&fool_spotted("Whom do I call again?"))
                .await?;
            return Ok(());
        }

        let mention = args.first().map(String::as_str).unwrap_or_default();
        let line = mode
            .lines()
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("Yo!");
        let reply = Reply::text(format!("{line} {mention}"));
        for _ in 0..mode.repeat() {
            context.notifier.emit(&reply).await?;
        }
        Ok(())
    }
}

/// `kill @user`: a gif and a mention.
pub struct KillCommand;

#[async_trait]
impl CommandHandler for KillCommand {
    fn command(&self) -> &str {
        "kill"
    }

    fn description(&self) -> &str {
        "For when summoning is not enough"
    }

    async fn execute(&self, args: &[String], context: &CommandContext) -> Result<()> {
        if !is_member(args.first(), context).await? {
            context
                .notifier
                .emit(&fool_spotted("Can you kill someone from this server?"))
                .await?;
            return Ok(());
        }

        let gif = KILL_GIFS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(KILL_GIFS[0]);
        context
            .notifier
            .emit(&Reply::embed("Mode: KILL").with_image(gif))
            .await?;
        let mention = args.first().map(String::as_str).unwrap_or_default();
        context.notifier.emit(&Reply::text(mention)).await?;
        Ok(())
    }
}
