#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::cast_possible_wrap,
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unused_self,
    clippy::unnecessary_wraps
)]

use clap::Subcommand;
use serde::{Deserialize, Serialize};

pub mod auto_reply;
pub mod bot;
pub mod channels;
pub mod cloud;
pub mod config;
pub mod infra;
pub mod ledger;
pub mod lifecycle;
pub(crate) mod util;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;

/// Usage ledger subcommands
#[derive(Subcommand, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LedgerCommands {
    /// Show today's usage for a capped server
    #[command(long_about = "\
Show today's usage for a capped server.

Reads the server's record from the configured ledger backend and \
prints minutes played, the day they belong to, and the minutes left \
under the daily cap. A record from an earlier day counts as zero.

Examples:
  summonbot ledger show factorio")]
    Show {
        /// Server name as configured under [[servers]]
        server: String,
    },
    /// Zero today's usage for a capped server
    #[command(long_about = "\
Zero today's usage for a capped server.

Overwrites the server's record with 0 minutes for today in the \
reference time zone, so the server can be started again.

Examples:
  summonbot ledger reset factorio")]
    Reset {
        /// Server name as configured under [[servers]]
        server: String,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}
