use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::traits::{Channel, GuildDirectory, MessageRef, Notifier, Reply};
use crate::auto_reply::InboundMessage;

/// Console channel: reads commands from stdin, prints replies to stdout.
pub struct CliChannel {
    notifier: Arc<CliNotifier>,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            notifier: Arc::new(CliNotifier::default()),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct CliNotifier {
    next_id: AtomicU64,
}

#[async_trait]
impl Notifier for CliNotifier {
    async fn emit(&self, reply: &Reply) -> Result<MessageRef> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        println!("{}", reply.render_plain());
        Ok(MessageRef {
            channel: "cli".to_string(),
            id: id.to_string(),
        })
    }

    async fn edit(&self, message: &MessageRef, reply: &Reply) -> Result<()> {
        println!("(#{} edited) {}", message.id, reply.render_plain());
        Ok(())
    }

    fn name(&self) -> &str {
        "cli"
    }
}

/// Everyone is a member and no role exists, so quota notices use the fallback audience.
pub struct CliDirectory;

#[async_trait]
impl GuildDirectory for CliDirectory {
    async fn role_mention(&self, _role_name: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn is_member(&self, _user_id: u64) -> Result<bool> {
        Ok(true)
    }
}

fn inbound(line: &str, sequence: u64) -> Option<InboundMessage> {
    let content = line.trim();
    if content.is_empty() {
        return None;
    }
    Some(InboundMessage {
        id: sequence.to_string(),
        sender: "user".to_string(),
        sender_id: 0,
        content: content.to_string(),
        channel: "cli".to_string(),
        guild_id: None,
        timestamp: chrono::Utc::now(),
    })
}

#[async_trait]
impl Channel for CliChannel {
    async fn listen(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        let mut lines = BufReader::new(io::stdin()).lines();
        let mut sequence = 0u64;
        while let Some(line) = lines.next_line().await? {
            if matches!(line.trim(), "/quit" | "/exit") {
                break;
            }
            sequence += 1;
            if let Some(message) = inbound(&line, sequence) {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
        }
        Ok(())
    }

    fn notifier_for(&self, _channel: &str) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    fn directory(&self) -> Arc<dyn GuildDirectory> {
        Arc::new(CliDirectory)
    }

    fn name(&self) -> &str {
        "cli"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_channel_name() {
        assert_eq!(CliChannel::new().name(), "cli");
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(inbound("   ", 1).is_none());
        let msg = inbound("  !fstatus ", 2).unwrap();
        assert_eq!(msg.content, "!fstatus");
        assert_eq!(msg.channel, "cli");
        assert!(msg.guild_id.is_none());
    }

    #[tokio::test]
    async fn cli_notifier_ids_increase() {
        let notifier = CliNotifier::default();
        let first = notifier.emit(&Reply::text("a")).await.unwrap();
        let second = notifier.emit(&Reply::text("b")).await.unwrap();
        assert_eq!(first.id, "1");
        assert_eq!(second.id, "2");
        notifier.edit(&first, &Reply::text("c")).await.unwrap();
    }

    #[tokio::test]
    async fn cli_directory_admits_everyone() {
        assert!(CliDirectory.is_member(123).await.unwrap());
        assert!(CliDirectory.role_mention("factorio").await.unwrap().is_none());
    }
}
