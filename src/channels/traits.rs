//! Chat channel traits: outbound replies, guild lookups, inbound listening.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::auto_reply::InboundMessage;

/// Embed accent colors used by the bot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Color {
    Green,
    Red,
    Orange,
    Purple,
}

impl Color {
    /// Discord's RGB value for the named color.
    pub fn rgb(self) -> u32 {
        match self {
            Self::Green => 0x2e_cc_71,
            Self::Red => 0xe7_4c_3c,
            Self::Orange => 0xe6_7e_22,
            Self::Purple => 0x9b_59_b6,
        }
    }
}

/// One outbound message: plain text, an embed, or both.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reply {
    pub content: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub color: Option<Color>,
    pub image_url: Option<String>,
}

impl Reply {
    /// Plain text message.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Embed with a title.
    pub fn embed(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn is_embed(&self) -> bool {
        self.title.is_some() || self.description.is_some() || self.image_url.is_some()
    }

    /// Single-line rendering for logs and the console channel.
    pub fn render_plain(&self) -> String {
        let mut parts = Vec::new();
        if let Some(title) = &self.title {
            parts.push(format!("[{title}]"));
        }
        if let Some(description) = &self.description {
            parts.push(description.trim().to_string());
        }
        if let Some(url) = &self.image_url {
            parts.push(url.clone());
        }
        if let Some(content) = &self.content {
            parts.push(content.clone());
        }
        parts.join(" ")
    }
}

/// Reference to a message already delivered, for edit-in-place.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel: String,
    pub id: String,
}

/// Fire-and-forget delivery to the context that triggered a command.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a new message.
    async fn emit(&self, reply: &Reply) -> Result<MessageRef>;

    /// Replace the contents of a previously emitted message.
    async fn edit(&self, message: &MessageRef, reply: &Reply) -> Result<()>;

    fn name(&self) -> &str;
}

/// Lookups against the guild the bot serves.
#[async_trait]
pub trait GuildDirectory: Send + Sync {
    /// Mention string for the named role, or `None` if no such role exists.
    async fn role_mention(&self, role_name: &str) -> Result<Option<String>>;

    /// Whether the user id belongs to a member of the guild.
    async fn is_member(&self, user_id: u64) -> Result<bool>;
}

/// A chat transport that produces inbound messages and a notifier per reply target.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Run until the transport closes, forwarding every inbound message.
    async fn listen(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()>;

    /// Notifier that replies into the given channel id.
    fn notifier_for(&self, channel: &str) -> std::sync::Arc<dyn Notifier>;

    /// Directory of the guild this channel serves.
    fn directory(&self) -> std::sync::Arc<dyn GuildDirectory>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_embed_fields() {
        let reply = Reply::embed("Factorio Bois")
            .with_description("Server started!")
            .with_color(Color::Green);
        assert!(reply.is_embed());
        assert_eq!(reply.title.as_deref(), Some("Factorio Bois"));
        assert_eq!(reply.color, Some(Color::Green));
    }

    #[test]
    fn text_reply_is_not_embed() {
        assert!(!Reply::text("hi").is_embed());
    }

    #[test]
    fn render_plain_joins_parts() {
        let reply = Reply::embed("Mode: KILL").with_image("https://gif");
        assert_eq!(reply.render_plain(), "[Mode: KILL] https://gif");
    }

    #[test]
    fn reply_serialization_roundtrip() {
        let reply = Reply::embed("t").with_color(Color::Purple);
        let json = serde_json::to_string(&reply).unwrap();
        let back: Reply = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reply);
    }
}
