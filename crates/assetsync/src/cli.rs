//! Clap derive structures for the `assetsync` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// assetsync -- watch the asset inventory push channel
#[derive(Debug, Parser)]
#[command(
    name = "assetsync",
    version,
    about = "Watch real-time asset inventory dashboard events",
    long_about = "Connects to the inventory server's WebSocket push channel, keeps it \
        alive with heartbeats and backoff reconnects, and prints every routed \
        dashboard event as a JSON line.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Profile to use
    #[arg(long, short = 'p', env = "ASSETSYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "ASSETSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect and stream dashboard events until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Inspect configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Push endpoint URL (overrides the profile)
    #[arg(long, short = 'u', env = "ASSETSYNC_URL")]
    pub url: Option<String>,

    /// Channel to subscribe (repeatable; replaces the profile's channels)
    #[arg(long = "channel", short = 'c', value_name = "CHANNEL")]
    pub channels: Vec<String>,

    /// Seconds between telemetry summaries
    #[arg(
        long,
        default_value = "30",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub stats_interval: u64,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current resolved configuration
    Show,

    /// Print the config file location
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
