#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{anyhow, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::io::Write;
use tracing_subscriber::{fmt, EnvFilter};

use summonbot::config::{resolve_config_dir, Config};
use summonbot::{bot, channels, ledger, ConfigCommands, LedgerCommands};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    #[value(name = "bash")]
    Bash,
    #[value(name = "fish")]
    Fish,
    #[value(name = "zsh")]
    Zsh,
    #[value(name = "powershell")]
    PowerShell,
    #[value(name = "elvish")]
    Elvish,
}

/// `summonbot` - summon your friends, boot your game servers.
#[derive(Parser, Debug)]
#[command(name = "summonbot")]
#[command(version)]
#[command(about = "Discord bot for summoning friends and running game servers.", long_about = None)]
struct Cli {
    /// Directory holding config.toml and the data/ folder
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to Discord and serve commands
    #[command(long_about = "\
Connect to Discord and serve commands.

Opens the Discord gateway with the configured bot token and answers \
prefix commands in the configured guild until interrupted. Usage ticks \
for capped servers are disarmed on shutdown.

Examples:
  summonbot run
  SUMMONBOT_BOT_TOKEN=... summonbot run
  RUST_LOG=summonbot=debug summonbot run")]
    Run,

    /// Serve commands typed on stdin
    #[command(long_about = "\
Serve commands typed on stdin.

Runs the same commands as the Discord bot, reading one message per \
line and printing replies. Everyone counts as a guild member and no \
roles exist. Type /quit to exit.

Examples:
  summonbot console
  echo '!fstatus' | summonbot console")]
    Console,

    /// List configured servers and their commands
    Servers,

    /// Inspect or reset daily usage records
    #[command(long_about = "\
Inspect or reset daily usage records.

Capped servers keep one record per server in the configured ledger \
backend (firestore, sqlite, or memory).

Examples:
  summonbot ledger show factorio
  summonbot ledger reset factorio")]
    Ledger {
        #[command(subcommand)]
        ledger_command: LedgerCommands,
    },

    /// Manage configuration
    #[command(long_about = "\
Manage summonbot configuration.

Use 'schema' to dump the full JSON Schema for the config file, which \
documents every available key, type, and default value.

Examples:
  summonbot config schema
  summonbot config schema > schema.json")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Generate shell completion script to stdout
    #[command(long_about = "\
Generate shell completion scripts for `summonbot`.

The script is printed to stdout so it can be sourced directly:

Examples:
  source <(summonbot completions bash)
  summonbot completions zsh > ~/.zfunc/_summonbot
  summonbot completions fish > ~/.config/fish/completions/summonbot.fish")]
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Completions must stay stdout-only: no config, no logging.
    if let Commands::Completions { shell } = &cli.command {
        let mut stdout = std::io::stdout().lock();
        write_shell_completion(*shell, &mut stdout)?;
        return Ok(());
    }

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("setting default subscriber failed: {e}"))?;

    let config_dir = resolve_config_dir(cli.config_dir.as_deref())?;
    let config = Config::load_or_init(&config_dir).await?;

    match cli.command {
        Commands::Completions { .. } => unreachable!(),

        Commands::Run => {
            let channel = channels::create_discord_channel(&config.bot)?;
            bot::run(config, channel).await
        }

        Commands::Console => {
            println!(
                "summonbot console. Type {}summon_bot for help, /quit to exit.",
                config.bot.command_prefix
            );
            bot::run(config, channels::create_cli_channel()).await
        }

        Commands::Servers => {
            print!("{}", render_servers(&config));
            Ok(())
        }

        Commands::Ledger { ledger_command } => {
            ledger::handle_command(ledger_command, &config).await
        }

        Commands::Config { config_command } => match config_command {
            ConfigCommands::Schema => {
                let schema = schemars::schema_for!(Config);
                println!("{}", serde_json::to_string_pretty(&schema)?);
                Ok(())
            }
        },
    }
}

fn render_servers(config: &Config) -> String {
    let prefix = &config.bot.command_prefix;
    let mut out = format!("Configured servers ({} total):\n\n", config.servers.len());
    out.push_str("  NAME         INSTANCE                                  COMMANDS\n");
    for server in &config.servers {
        let commands = ["start", "stop", "status"]
            .iter()
            .map(|action| format!("{prefix}{}{action}", server.command_prefix))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!(
            "  {:<12} {:<41} {}\n",
            server.name,
            server.instance_ref().to_string(),
            commands
        ));
        if let Some(quota) = &server.quota {
            out.push_str(&format!(
                "  {:<12} daily cap {} min, warnings at {:?} min left\n",
                "", quota.daily_cap_minutes, quota.warn_at_remaining
            ));
        }
    }
    out
}

fn write_shell_completion<W: Write>(shell: CompletionShell, writer: &mut W) -> Result<()> {
    use clap_complete::generate;
    use clap_complete::shells;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin_name.clone(), writer),
        CompletionShell::PowerShell => {
            generate(shells::PowerShell, &mut cmd, bin_name.clone(), writer);
        }
        CompletionShell::Elvish => generate(shells::Elvish, &mut cmd, bin_name, writer),
    }

    writer.flush()?;
    Ok(())
}
