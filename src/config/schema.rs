use anyhow::{Context, Result};
use chrono_tz::Tz;
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tokio::fs::File;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::cloud::gce::DEFAULT_COMPUTE_URL;
use crate::cloud::InstanceRef;
use crate::ledger::firestore::DEFAULT_FIRESTORE_URL;

const SUPPORTED_LEDGER_BACKENDS: &[&str] = &["firestore", "sqlite", "memory"];

// ── Top-level config ──────────────────────────────────────────────

/// Top-level summonbot configuration, loaded from `config.toml`.
///
/// Resolution order: `--config-dir` → `SUMMONBOT_CONFIG_DIR` env → `~/.summonbot/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// Directory for local state (sqlite ledger) - computed, not serialized
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Discord connection and command settings (`[bot]`).
    #[serde(default)]
    pub bot: BotConfig,

    /// Compute Engine access and operation polling (`[compute]`).
    #[serde(default)]
    pub compute: ComputeConfig,

    /// Usage ledger backend and reference time zone (`[ledger]`).
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Managed game servers (`[[servers]]`).
    #[serde(default = "default_servers")]
    pub servers: Vec<ServerConfig>,
}

fn default_servers() -> Vec<ServerConfig> {
    vec![ServerConfig::minecraft(), ServerConfig::factorio()]
}

// ── Bot ──────────────────────────────────────────────────────────

/// Discord bot configuration (`[bot]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BotConfig {
    /// Bot token. Overridden by `SUMMONBOT_BOT_TOKEN` or `BOT_TOKEN`.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Guild (server) the bot answers in. Overridden by `SUMMONBOT_GUILD_ID` or `GUILD_ID`.
    #[serde(default)]
    pub guild_id: Option<u64>,
    /// Prefix that marks a message as a command. Default: `"!"`.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// "Playing ..." presence text.
    #[serde(default = "default_presence")]
    pub presence: String,
    /// Discord REST base URL.
    #[serde(default = "default_discord_api_url")]
    pub api_url: String,
    /// Discord gateway WebSocket URL.
    #[serde(default = "default_discord_gateway_url")]
    pub gateway_url: String,
}

fn default_command_prefix() -> String {
    "!".into()
}

fn default_presence() -> String {
    "with life (!summon_bot)".into()
}

fn default_discord_api_url() -> String {
    "https://discord.com/api/v10".into()
}

fn default_discord_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".into()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            guild_id: None,
            command_prefix: default_command_prefix(),
            presence: default_presence(),
            api_url: default_discord_api_url(),
            gateway_url: default_discord_gateway_url(),
        }
    }
}

// ── Compute ──────────────────────────────────────────────────────

/// How poll progress is reported while waiting on an operation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// Post a new message on every poll iteration.
    #[default]
    Each,
    /// Post once, then edit that message in place.
    Edit,
}

/// Compute Engine configuration (`[compute]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ComputeConfig {
    /// Compute REST base URL.
    #[serde(default = "default_compute_url")]
    pub api_url: String,
    /// Seconds between operation polls. Default: `5`.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Progress reporting while polling. Default: `"each"`.
    #[serde(default)]
    pub progress: ProgressMode,
}

fn default_compute_url() -> String {
    DEFAULT_COMPUTE_URL.into()
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            api_url: default_compute_url(),
            poll_interval_secs: default_poll_interval_secs(),
            progress: ProgressMode::default(),
        }
    }
}

// ── Ledger ───────────────────────────────────────────────────────

/// Usage ledger configuration (`[ledger]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LedgerConfig {
    /// `"firestore"`, `"sqlite"` or `"memory"`. Default: `"firestore"`.
    #[serde(default = "default_ledger_backend")]
    pub backend: String,
    /// IANA time zone that decides when a new day starts. Default: `"Asia/Kolkata"`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Firestore document location (`[ledger.firestore]`).
    #[serde(default)]
    pub firestore: FirestoreConfig,
    /// Explicit sqlite database path; defaults to `<config dir>/data/usage.db`.
    #[serde(default)]
    pub sqlite_path: Option<String>,
}

fn default_ledger_backend() -> String {
    "firestore".into()
}

fn default_timezone() -> String {
    "Asia/Kolkata".into()
}

impl LedgerConfig {
    pub fn reference_timezone(&self) -> Result<Tz> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("ledger.timezone '{}' is invalid: {e}", self.timezone))
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: default_ledger_backend(),
            timezone: default_timezone(),
            firestore: FirestoreConfig::default(),
            sqlite_path: None,
        }
    }
}

/// Firestore location (`[ledger.firestore]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FirestoreConfig {
    /// Firestore REST base URL.
    #[serde(default = "default_firestore_url")]
    pub api_url: String,
    /// Project that owns the database.
    #[serde(default = "default_firestore_project")]
    pub project: String,
    /// Database id. Default: `"(default)"`.
    #[serde(default = "default_firestore_database")]
    pub database: String,
    /// Collection holding one document per server. Default: `"servers"`.
    #[serde(default = "default_firestore_collection")]
    pub collection: String,
    /// OAuth access token. Overridden by `SUMMONBOT_FIRESTORE_ACCESS_TOKEN`.
    #[serde(default)]
    pub access_token: Option<String>,
}

fn default_firestore_url() -> String {
    DEFAULT_FIRESTORE_URL.into()
}

fn default_firestore_project() -> String {
    "striking-effort-335611".into()
}

fn default_firestore_database() -> String {
    "(default)".into()
}

fn default_firestore_collection() -> String {
    "servers".into()
}

impl Default for FirestoreConfig {
    fn default() -> Self {
        Self {
            api_url: default_firestore_url(),
            project: default_firestore_project(),
            database: default_firestore_database(),
            collection: default_firestore_collection(),
            access_token: None,
        }
    }
}

// ── Servers ──────────────────────────────────────────────────────

/// One managed game server (`[[servers]]` entry).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ServerConfig {
    /// Short identifier used in logs, env vars and CLI (e.g. `"factorio"`).
    pub name: String,
    /// Embed title for replies about this server.
    pub title: String,
    /// Command prefix: `"f"` yields `fstart`, `fstop`, `fstatus`.
    pub command_prefix: String,
    /// Compute project id.
    pub project: String,
    /// Compute zone.
    pub zone: String,
    /// Instance name.
    pub instance: String,
    /// OAuth access token for this project. Overridden by `SUMMONBOT_<NAME>_ACCESS_TOKEN`.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Daily playtime cap; absent means uncapped (`[servers.quota]`).
    #[serde(default)]
    pub quota: Option<QuotaConfig>,
}

impl ServerConfig {
    pub fn minecraft() -> Self {
        Self {
            name: "minecraft".into(),
            title: "Meincraft Bois".into(),
            command_prefix: "m".into(),
            project: "test-salad-2125".into(),
            zone: "asia-south1-a".into(),
            instance: "minecraft".into(),
            access_token: None,
            quota: None,
        }
    }

    pub fn factorio() -> Self {
        Self {
            name: "factorio".into(),
            title: "Factorio Bois".into(),
            command_prefix: "f".into(),
            project: "striking-effort-335611".into(),
            zone: "asia-south1-a".into(),
            instance: "factorio".into(),
            access_token: None,
            quota: Some(QuotaConfig::default()),
        }
    }

    pub fn instance_ref(&self) -> InstanceRef {
        InstanceRef {
            project: self.project.clone(),
            zone: self.zone.clone(),
            instance: self.instance.clone(),
        }
    }

    /// Environment variable that overrides this server's access token.
    pub fn access_token_env(&self) -> String {
        let upper: String = self
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("SUMMONBOT_{upper}_ACCESS_TOKEN")
    }
}

/// Daily playtime cap (`[servers.quota]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QuotaConfig {
    /// Minutes allowed per day. Default: `120`.
    #[serde(default = "default_daily_cap_minutes")]
    pub daily_cap_minutes: u32,
    /// Seconds between usage ticks; each tick counts one minute. Default: `60`.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Remaining-minute marks that trigger a warning. Default: `[15, 10, 5]`.
    #[serde(default = "default_warn_at_remaining")]
    pub warn_at_remaining: Vec<u32>,
    /// Role mentioned in warnings. Default: `"factorio"`.
    #[serde(default = "default_notify_role")]
    pub notify_role: String,
    /// Audience label used when the role does not exist. Default: `"Factorio Bois"`.
    #[serde(default = "default_fallback_audience")]
    pub fallback_audience: String,
    /// Ledger key; defaults to the server name.
    #[serde(default)]
    pub ledger_key: Option<String>,
}

fn default_daily_cap_minutes() -> u32 {
    120
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_warn_at_remaining() -> Vec<u32> {
    vec![15, 10, 5]
}

fn default_notify_role() -> String {
    "factorio".into()
}

fn default_fallback_audience() -> String {
    "Factorio Bois".into()
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_cap_minutes: default_daily_cap_minutes(),
            tick_interval_secs: default_tick_interval_secs(),
            warn_at_remaining: default_warn_at_remaining(),
            notify_role: default_notify_role(),
            fallback_audience: default_fallback_audience(),
            ledger_key: None,
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
        let summonbot_dir = home.join(".summonbot");

        Self {
            config_path: summonbot_dir.join("config.toml"),
            data_dir: summonbot_dir.join("data"),
            bot: BotConfig::default(),
            compute: ComputeConfig::default(),
            ledger: LedgerConfig::default(),
            servers: default_servers(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".summonbot"))
}

/// Pick the config directory: explicit flag, then env, then `~/.summonbot`.
pub fn resolve_config_dir(cli_override: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = cli_override.map(str::trim).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(dir) = std::env::var("SUMMONBOT_CONFIG_DIR") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir.trim()));
        }
    }
    default_config_dir()
}

impl Config {
    /// Load `config.toml` from `config_dir`, writing defaults on first run.
    pub async fn load_or_init(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("config.toml");

        fs::create_dir_all(config_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let (mut config, initialized) = if config_path.exists() {
            // Warn if config file is world-readable (may contain tokens)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(&config_path).await {
                    if meta.permissions().mode() & 0o004 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-readable (mode {:o}). \
                             Consider restricting with: chmod 600 {:?}",
                            config_path,
                            meta.permissions().mode() & 0o777,
                            config_path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path.clone();
            config.data_dir = config_dir.join("data");
            (config, false)
        } else {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.data_dir = config_dir.join("data");
            config.save().await?;

            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }
            (config, true)
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            servers = config.servers.len(),
            ledger = %config.ledger.backend,
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.bot.command_prefix.trim().is_empty() {
            anyhow::bail!("bot.command_prefix must not be empty");
        }
        if self.compute.poll_interval_secs == 0 {
            anyhow::bail!("compute.poll_interval_secs must be greater than 0");
        }

        let backend = self.ledger.backend.trim().to_ascii_lowercase();
        if !SUPPORTED_LEDGER_BACKENDS.contains(&backend.as_str()) {
            anyhow::bail!(
                "ledger.backend '{}' is not supported (valid: {})",
                self.ledger.backend,
                SUPPORTED_LEDGER_BACKENDS.join(", ")
            );
        }
        self.ledger.reference_timezone()?;

        let mut names = HashSet::new();
        let mut prefixes = HashSet::new();
        for (i, server) in self.servers.iter().enumerate() {
            for (field, value) in [
                ("name", &server.name),
                ("command_prefix", &server.command_prefix),
                ("project", &server.project),
                ("zone", &server.zone),
                ("instance", &server.instance),
            ] {
                if value.trim().is_empty() {
                    anyhow::bail!("servers[{i}].{field} must not be empty");
                }
            }
            if !names.insert(server.name.to_ascii_lowercase()) {
                anyhow::bail!("servers[{i}].name '{}' is duplicated", server.name);
            }
            if !prefixes.insert(server.command_prefix.to_ascii_lowercase()) {
                anyhow::bail!(
                    "servers[{i}].command_prefix '{}' is duplicated",
                    server.command_prefix
                );
            }
            if let Some(quota) = &server.quota {
                if quota.daily_cap_minutes == 0 {
                    anyhow::bail!("servers[{i}].quota.daily_cap_minutes must be greater than 0");
                }
                if quota.tick_interval_secs == 0 {
                    anyhow::bail!("servers[{i}].quota.tick_interval_secs must be greater than 0");
                }
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides using `lookup` in place of the process environment.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };

        if let Some(token) = first(&["SUMMONBOT_BOT_TOKEN", "BOT_TOKEN"]) {
            self.bot.bot_token = Some(token);
        }

        if let Some(raw) = first(&["SUMMONBOT_GUILD_ID", "GUILD_ID"]) {
            match raw.parse::<u64>() {
                Ok(id) => self.bot.guild_id = Some(id),
                Err(_) => tracing::warn!("Ignoring non-numeric guild id override: {raw}"),
            }
        }

        if let Some(backend) = first(&["SUMMONBOT_LEDGER_BACKEND"]) {
            self.ledger.backend = backend;
        }

        if let Some(timezone) = first(&["SUMMONBOT_TIMEZONE"]) {
            self.ledger.timezone = timezone;
        }

        let shared_token = first(&["SUMMONBOT_GCP_ACCESS_TOKEN"]);

        if let Some(token) = first(&["SUMMONBOT_FIRESTORE_ACCESS_TOKEN"]) {
            self.ledger.firestore.access_token = Some(token);
        } else if self.ledger.firestore.access_token.is_none() {
            self.ledger.firestore.access_token = shared_token.clone();
        }

        for server in &mut self.servers {
            if let Some(token) = first(&[server.access_token_env().as_str()]) {
                server.access_token = Some(token);
            } else if server.access_token.is_none() {
                server.access_token = shared_token.clone();
            }
        }
    }

    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;

        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));
        let backup_path = parent_dir.join(format!("{file_name}.bak"));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        let had_existing_config = self.config_path.exists();
        if had_existing_config {
            fs::copy(&self.config_path, &backup_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to create config backup before atomic replace: {}",
                        backup_path.display()
                    )
                })?;
        }

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            if had_existing_config && backup_path.exists() {
                fs::copy(&backup_path, &self.config_path)
                    .await
                    .context("Failed to restore config backup")?;
            }
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir).await?;

        if had_existing_config {
            let _ = fs::remove_file(&backup_path).await;
        }

        Ok(())
    }

    /// Look up a server by name (case-insensitive).
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
    }
}

async fn sync_directory(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)
            .await
            .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
        dir.sync_all()
            .await
            .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── Defaults ─────────────────────────────────────────────

    #[test]
    fn config_default_has_sane_values() {
        let c = Config::default();
        assert_eq!(c.bot.command_prefix, "!");
        assert!(c.bot.bot_token.is_none());
        assert_eq!(c.compute.poll_interval_secs, 5);
        assert_eq!(c.compute.progress, ProgressMode::Each);
        assert_eq!(c.ledger.backend, "firestore");
        assert_eq!(c.ledger.timezone, "Asia/Kolkata");
        assert!(c.config_path.to_string_lossy().contains("config.toml"));
        c.validate().unwrap();
    }

    #[test]
    fn default_servers_match_the_two_game_servers() {
        let c = Config::default();
        let minecraft = c.server("minecraft").unwrap();
        assert_eq!(minecraft.command_prefix, "m");
        assert!(minecraft.quota.is_none());

        let factorio = c.server("Factorio").unwrap();
        assert_eq!(factorio.command_prefix, "f");
        let quota = factorio.quota.as_ref().unwrap();
        assert_eq!(quota.daily_cap_minutes, 120);
        assert_eq!(quota.tick_interval_secs, 60);
        assert_eq!(quota.warn_at_remaining, vec![15, 10, 5]);
        assert_eq!(quota.fallback_audience, "Factorio Bois");
    }

    #[test]
    fn config_schema_export_contains_expected_contract_shape() {
        let schema = schemars::schema_for!(Config);
        let schema_json = serde_json::to_value(&schema).expect("schema should serialize to json");

        let properties = schema_json
            .get("properties")
            .and_then(serde_json::Value::as_object)
            .expect("schema should expose top-level properties");

        assert!(properties.contains_key("bot"));
        assert!(properties.contains_key("servers"));
        assert!(properties.contains_key("ledger"));
        assert!(!properties.contains_key("config_path"));
        assert!(!properties.contains_key("data_dir"));
    }

    // ── Serde round-trip ─────────────────────────────────────

    #[test]
    fn config_toml_roundtrip() {
        let mut config = Config::default();
        config.bot.guild_id = Some(123_456_789_012_345_678);
        config.compute.progress = ProgressMode::Edit;
        config.ledger.backend = "sqlite".into();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.bot.guild_id, Some(123_456_789_012_345_678));
        assert_eq!(parsed.compute.progress, ProgressMode::Edit);
        assert_eq!(parsed.ledger.backend, "sqlite");
        assert_eq!(parsed.servers.len(), 2);
    }

    #[test]
    fn minimal_toml_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
[[servers]]
name = "valheim"
title = "Viking Bois"
command_prefix = "v"
project = "p"
zone = "europe-west1-b"
instance = "valheim"

[servers.quota]
daily_cap_minutes = 90
"#,
        )
        .unwrap();
        assert_eq!(parsed.servers.len(), 1);
        let quota = parsed.servers[0].quota.as_ref().unwrap();
        assert_eq!(quota.daily_cap_minutes, 90);
        assert_eq!(quota.tick_interval_secs, 60);
        assert_eq!(parsed.bot.presence, "with life (!summon_bot)");
    }

    // ── Env overrides ────────────────────────────────────────

    #[test]
    fn env_overrides_bot_token_and_guild() {
        let mut c = Config::default();
        c.apply_overrides_from(lookup(&[("BOT_TOKEN", "abc"), ("GUILD_ID", " 42 ")]));
        assert_eq!(c.bot.bot_token.as_deref(), Some("abc"));
        assert_eq!(c.bot.guild_id, Some(42));
    }

    #[test]
    fn prefixed_env_wins_over_generic() {
        let mut c = Config::default();
        c.apply_overrides_from(lookup(&[
            ("BOT_TOKEN", "generic"),
            ("SUMMONBOT_BOT_TOKEN", "specific"),
        ]));
        assert_eq!(c.bot.bot_token.as_deref(), Some("specific"));
    }

    #[test]
    fn non_numeric_guild_is_ignored() {
        let mut c = Config::default();
        c.bot.guild_id = Some(7);
        c.apply_overrides_from(lookup(&[("GUILD_ID", "my-guild")]));
        assert_eq!(c.bot.guild_id, Some(7));
    }

    #[test]
    fn per_server_token_beats_shared_token() {
        let mut c = Config::default();
        c.apply_overrides_from(lookup(&[
            ("SUMMONBOT_GCP_ACCESS_TOKEN", "shared"),
            ("SUMMONBOT_FACTORIO_ACCESS_TOKEN", "factorio-only"),
        ]));
        assert_eq!(
            c.server("factorio").unwrap().access_token.as_deref(),
            Some("factorio-only")
        );
        assert_eq!(
            c.server("minecraft").unwrap().access_token.as_deref(),
            Some("shared")
        );
        assert_eq!(c.ledger.firestore.access_token.as_deref(), Some("shared"));
    }

    #[test]
    fn access_token_env_name_is_upper_snake() {
        let mut server = ServerConfig::minecraft();
        server.name = "space-engineers".into();
        assert_eq!(
            server.access_token_env(),
            "SUMMONBOT_SPACE_ENGINEERS_ACCESS_TOKEN"
        );
    }

    // ── Validation ───────────────────────────────────────────

    #[test]
    fn validate_rejects_duplicate_prefix() {
        let mut c = Config::default();
        c.servers[1].command_prefix = "M".into();
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("command_prefix"));
    }

    #[test]
    fn validate_rejects_duplicate_name() {
        let mut c = Config::default();
        c.servers[1].name = "minecraft".into();
        assert!(c.validate().unwrap_err().to_string().contains("duplicated"));
    }

    #[test]
    fn validate_rejects_bad_timezone() {
        let mut c = Config::default();
        c.ledger.timezone = "Mars/Olympus".into();
        assert!(c.validate().unwrap_err().to_string().contains("timezone"));
    }

    #[test]
    fn validate_rejects_unknown_backend() {
        let mut c = Config::default();
        c.ledger.backend = "redis".into();
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_cap() {
        let mut c = Config::default();
        if let Some(quota) = c.servers[1].quota.as_mut() {
            quota.daily_cap_minutes = 0;
        }
        assert!(c.validate().unwrap_err().to_string().contains("daily_cap_minutes"));
    }

    #[test]
    fn validate_rejects_empty_instance() {
        let mut c = Config::default();
        c.servers[0].instance = " ".into();
        assert!(c.validate().unwrap_err().to_string().contains("instance"));
    }

    // ── Load / save ──────────────────────────────────────────

    #[tokio::test]
    async fn load_or_init_writes_defaults_then_reads_them_back() {
        let tmp = TempDir::new().unwrap();
        let first = Config::load_or_init(tmp.path()).await.unwrap();
        assert!(tmp.path().join("config.toml").exists());
        assert_eq!(first.data_dir, tmp.path().join("data"));

        let second = Config::load_or_init(tmp.path()).await.unwrap();
        assert_eq!(second.servers.len(), first.servers.len());
        assert_eq!(second.bot.command_prefix, "!");
    }

    #[tokio::test]
    async fn save_replaces_existing_file_atomically() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.config_path = tmp.path().join("config.toml");
        config.save().await.unwrap();

        config.compute.poll_interval_secs = 9;
        config.save().await.unwrap();

        let contents = std::fs::read_to_string(&config.config_path).unwrap();
        let parsed: Config = toml::from_str(&contents).unwrap();
        assert_eq!(parsed.compute.poll_interval_secs, 9);
        assert!(!tmp.path().join("config.toml.bak").exists());
    }

    #[test]
    fn resolve_config_dir_prefers_cli_flag() {
        let dir = resolve_config_dir(Some("/tmp/summonbot-test")).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/summonbot-test"));
    }
}
