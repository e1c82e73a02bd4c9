//! Discord transport: gateway WebSocket for inbound messages, REST for replies
//! and guild lookups.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use super::traits::{Channel, GuildDirectory, MessageRef, Notifier, Reply};
use crate::auto_reply::InboundMessage;
use crate::config::BotConfig;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
const INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15);

const MAX_BACKOFF: Duration = Duration::from_secs(60);

const MAX_RATE_LIMIT_RETRIES: u32 = 5;
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

// ── REST ─────────────────────────────────────────────────────────

/// Thin client for the handful of REST endpoints the bot needs.
pub struct DiscordRest {
    api_url: String,
    token: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct Role {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
    channel_id: String,
}

impl DiscordRest {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Send `request`, waiting out rate limits. After `MAX_RATE_LIMIT_RETRIES`
    /// retries the final 429 is returned to the caller.
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let request = request.header("Authorization", self.auth());
        let mut retries = 0;
        loop {
            let Some(attempt) = request.try_clone() else {
                bail!("Discord {what} request could not be retried");
            };
            let response = attempt
                .send()
                .await
                .with_context(|| format!("Discord {what} request failed"))?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS
                || retries >= MAX_RATE_LIMIT_RETRIES
            {
                return Ok(response);
            }
            retries += 1;
            let header = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            let body = response.text().await.unwrap_or_default();
            let wait = retry_after(header.as_deref(), &body);
            tracing::debug!(
                request = what,
                retry = retries,
                wait_ms = wait.as_millis(),
                "rate limited by Discord"
            );
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn create_message(&self, channel_id: &str, reply: &Reply) -> Result<MessageRef> {
        let url = format!("{}/channels/{channel_id}/messages", self.api_url);
        let request = self.client.post(&url).json(&message_body(reply));
        let response = self.send(request, "create message").await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let created: CreatedMessage = response
            .json()
            .await
            .context("Discord create message response was not valid JSON")?;
        Ok(MessageRef {
            channel: created.channel_id,
            id: created.id,
        })
    }

    pub async fn edit_message(&self, message: &MessageRef, reply: &Reply) -> Result<()> {
        let url = format!(
            "{}/channels/{}/messages/{}",
            self.api_url, message.channel, message.id
        );
        let request = self.client.patch(&url).json(&message_body(reply));
        let response = self.send(request, "edit message").await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    async fn guild_roles(&self, guild_id: u64) -> Result<Vec<Role>> {
        let url = format!("{}/guilds/{guild_id}/roles", self.api_url);
        let response = self.send(self.client.get(&url), "list roles").await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        response
            .json()
            .await
            .context("Discord roles response was not valid JSON")
    }

    async fn has_member(&self, guild_id: u64, user_id: u64) -> Result<bool> {
        let url = format!("{}/guilds/{guild_id}/members/{user_id}", self.api_url);
        let response = self.send(self.client.get(&url), "member lookup").await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(api_error(response).await),
        }
    }
}

/// How long a 429 asks us to wait: the body's `retry_after` (fractional
/// seconds), else the `Retry-After` header, else one second.
fn retry_after(header: Option<&str>, body: &str) -> Duration {
    let from_body = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("retry_after").and_then(Value::as_f64));
    let from_header = header.and_then(|h| h.trim().parse::<f64>().ok());
    match from_body.or(from_header) {
        Some(secs) if secs.is_finite() && secs >= 0.0 => {
            Duration::from_secs_f64(secs).min(MAX_RETRY_AFTER)
        }
        _ => Duration::from_secs(1),
    }
}

/// JSON body for create/edit message.
fn message_body(reply: &Reply) -> Value {
    let mut body = json!({});
    if let Some(content) = &reply.content {
        body["content"] = json!(content);
    }
    if reply.is_embed() {
        let mut embed = json!({});
        if let Some(title) = &reply.title {
            embed["title"] = json!(title);
        }
        if let Some(description) = &reply.description {
            embed["description"] = json!(description);
        }
        if let Some(color) = reply.color {
            embed["color"] = json!(color.rgb());
        }
        if let Some(url) = &reply.image_url {
            embed["image"] = json!({ "url": url });
        }
        body["embeds"] = json!([embed]);
    }
    body
}

async fn api_error(response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read Discord error body>".to_string());
    let sanitized = crate::util::sanitize_api_error(&body);
    anyhow::anyhow!("Discord API error ({status}): {sanitized}")
}

/// Replies into one text channel.
pub struct DiscordNotifier {
    rest: Arc<DiscordRest>,
    channel_id: String,
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn emit(&self, reply: &Reply) -> Result<MessageRef> {
        self.rest.create_message(&self.channel_id, reply).await
    }

    async fn edit(&self, message: &MessageRef, reply: &Reply) -> Result<()> {
        self.rest.edit_message(message, reply).await
    }

    fn name(&self) -> &str {
        "discord"
    }
}

/// Role and member lookups against the configured guild.
pub struct DiscordDirectory {
    rest: Arc<DiscordRest>,
    guild_id: Option<u64>,
}

#[async_trait]
impl GuildDirectory for DiscordDirectory {
    async fn role_mention(&self, role_name: &str) -> Result<Option<String>> {
        let Some(guild_id) = self.guild_id else {
            return Ok(None);
        };
        let roles = self.rest.guild_roles(guild_id).await?;
        Ok(roles
            .into_iter()
            .find(|r| r.name == role_name)
            .map(|r| format!("<@&{}>", r.id)))
    }

    async fn is_member(&self, user_id: u64) -> Result<bool> {
        match self.guild_id {
            Some(guild_id) => self.rest.has_member(guild_id, user_id).await,
            None => {
                tracing::debug!(user_id, "no guild configured, skipping member check");
                Ok(true)
            }
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GatewayFrame {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

enum SessionEnd {
    /// Discord asked us to reconnect or closed the socket.
    Reconnect,
    /// Nobody is consuming inbound messages any more.
    ReceiverGone,
}

fn identify_payload(token: &str, presence: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "summonbot",
                "device": "summonbot",
            },
            "presence": {
                "activities": [{ "name": presence, "type": 0 }],
                "status": "online",
                "since": null,
                "afk": false,
            },
        },
    })
}

fn heartbeat_payload(seq: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": seq })
}

/// Turn a `MESSAGE_CREATE` payload into an inbound message. Bot authors and
/// messages from other guilds are dropped.
fn parse_message_create(d: &Value, guild_filter: Option<u64>) -> Option<InboundMessage> {
    let author = d.get("author")?;
    if author.get("bot").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let guild_id = d
        .get("guild_id")
        .and_then(Value::as_str)
        .and_then(|g| g.parse::<u64>().ok());
    if let Some(expected) = guild_filter {
        if guild_id != Some(expected) {
            return None;
        }
    }

    let timestamp = d
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
        .map_or_else(chrono::Utc::now, |t| t.with_timezone(&chrono::Utc));

    Some(InboundMessage {
        id: d.get("id")?.as_str()?.to_string(),
        sender: author
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        sender_id: author.get("id")?.as_str()?.parse().ok()?,
        content: d.get("content")?.as_str()?.to_string(),
        channel: d.get("channel_id")?.as_str()?.to_string(),
        guild_id,
        timestamp,
    })
}

/// Discord bot channel.
pub struct DiscordChannel {
    rest: Arc<DiscordRest>,
    token: String,
    guild_id: Option<u64>,
    gateway_url: String,
    presence: String,
}

impl DiscordChannel {
    pub fn new(config: &BotConfig) -> Result<Self> {
        let Some(token) = config.bot_token.as_deref().filter(|t| !t.trim().is_empty()) else {
            bail!("Discord bot token is not set. Set bot.bot_token or BOT_TOKEN");
        };
        if config.guild_id.is_none() {
            tracing::warn!("bot.guild_id is not set; commands from every guild will be answered");
        }
        Ok(Self {
            rest: Arc::new(DiscordRest::new(&config.api_url, token)),
            token: token.to_string(),
            guild_id: config.guild_id,
            gateway_url: config.gateway_url.clone(),
            presence: config.presence.clone(),
        })
    }

    async fn run_session(&self, tx: &mpsc::Sender<InboundMessage>) -> Result<SessionEnd> {
        let (socket, _) = tokio_tungstenite::connect_async(self.gateway_url.as_str())
            .await
            .context("Discord gateway connection failed")?;
        let (mut write, mut read) = socket.split();

        let interval_ms = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: GatewayFrame =
                        serde_json::from_str(&text).context("Discord hello was not valid JSON")?;
                    if frame.op != OP_HELLO {
                        bail!("expected Discord hello, got op {}", frame.op);
                    }
                    break frame
                        .d
                        .get("heartbeat_interval")
                        .and_then(Value::as_u64)
                        .context("Discord hello without heartbeat_interval")?;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("Discord gateway read failed"),
                None => return Ok(SessionEnd::Reconnect),
            }
        };

        write
            .send(Message::Text(
                identify_payload(&self.token, &self.presence).to_string(),
            ))
            .await
            .context("Discord identify failed")?;

        let interval = Duration::from_millis(interval_ms);
        let jitter = interval.mul_f64(rand::random::<f64>());
        let mut heartbeat = tokio::time::interval_at(Instant::now() + jitter, interval);
        let mut seq: Option<u64> = None;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    write
                        .send(Message::Text(heartbeat_payload(seq).to_string()))
                        .await
                        .context("Discord heartbeat failed")?;
                }
                incoming = read.next() => {
                    let text = match incoming {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Discord gateway closed the connection");
                            return Ok(SessionEnd::Reconnect);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e).context("Discord gateway read failed"),
                        None => return Ok(SessionEnd::Reconnect),
                    };
                    let frame: GatewayFrame = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!("skipping undecodable gateway frame: {e}");
                            continue;
                        }
                    };
                    if frame.s.is_some() {
                        seq = frame.s;
                    }
                    match frame.op {
                        OP_DISPATCH => match frame.t.as_deref() {
                            Some("READY") => {
                                let user = frame.d.pointer("/user/username").and_then(Value::as_str);
                                tracing::info!(user = user.unwrap_or("?"), guild = ?self.guild_id, "connected to Discord");
                            }
                            Some("MESSAGE_CREATE") => {
                                if let Some(message) = parse_message_create(&frame.d, self.guild_id) {
                                    if tx.send(message).await.is_err() {
                                        return Ok(SessionEnd::ReceiverGone);
                                    }
                                }
                            }
                            _ => {}
                        },
                        OP_HEARTBEAT => {
                            write
                                .send(Message::Text(heartbeat_payload(seq).to_string()))
                                .await
                                .context("Discord heartbeat failed")?;
                        }
                        OP_RECONNECT | OP_INVALID_SESSION => {
                            tracing::info!(op = frame.op, "Discord requested a new session");
                            return Ok(SessionEnd::Reconnect);
                        }
                        OP_HEARTBEAT_ACK => tracing::trace!("heartbeat acknowledged"),
                        other => tracing::debug!(op = other, "ignoring gateway op"),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    async fn listen(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        let mut backoff = Duration::from_secs(1);
        loop {
            match self.run_session(&tx).await {
                Ok(SessionEnd::ReceiverGone) => return Ok(()),
                Ok(SessionEnd::Reconnect) => backoff = Duration::from_secs(1),
                Err(e) => tracing::warn!("Discord session ended: {e:#}"),
            }
            if tx.is_closed() {
                return Ok(());
            }
            tracing::info!(delay_secs = backoff.as_secs(), "reconnecting to Discord");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    fn notifier_for(&self, channel: &str) -> Arc<dyn Notifier> {
        Arc::new(DiscordNotifier {
            rest: Arc::clone(&self.rest),
            channel_id: channel.to_string(),
        })
    }

    fn directory(&self) -> Arc<dyn GuildDirectory> {
        Arc::new(DiscordDirectory {
            rest: Arc::clone(&self.rest),
            guild_id: self.guild_id,
        })
    }

    fn name(&self) -> &str {
        "discord"
    }
}
