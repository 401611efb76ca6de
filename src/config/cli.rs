use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the tidemark binary.
#[derive(Debug, Parser)]
#[command(
    name = "tidemark",
    version,
    about = "Cache lifetimes and invalidation for scheduled content"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TIDEMARK_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: SettingsOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the periodic transition scan until interrupted.
    Run,
    /// Run a single transition scan and print its report.
    Scan,
    /// Print the next transition for a workspace and language.
    #[command(name = "next-transition")]
    NextTransition(ScopeArgs),
    /// Print the cache lifetime a page rendered now would receive.
    Lifetime(LifetimeArgs),
    /// List content records carrying a start or end time.
    List(ScopeArgs),
    /// Print the harmonized form of a timestamp.
    Harmonize(HarmonizeArgs),
}

#[derive(Debug, Args, Clone, Copy, Default)]
pub struct ScopeArgs {
    /// Workspace id; `0` is the live workspace.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub workspace: i32,

    /// Language id; `0` is the default language.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub language: i32,
}

#[derive(Debug, Args, Clone, Copy)]
pub struct LifetimeArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Lifetime the host would use on its own, in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub proposed: Option<u64>,

    /// Site-level ceiling in seconds; overrides `lifetime.site_ceiling`.
    #[arg(long = "site-ceiling", value_name = "SECONDS")]
    pub site_ceiling: Option<u64>,
}

#[derive(Debug, Args, Clone, Copy)]
pub struct HarmonizeArgs {
    /// Unix timestamp in seconds.
    #[arg(value_name = "TIMESTAMP", allow_negative_numbers = true)]
    pub timestamp: i64,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SettingsOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Force debug logging for tidemark targets.
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the scoping strategy (global|per-page|per-content).
    #[arg(long = "scoping", value_name = "STRATEGY", global = true)]
    pub scoping: Option<String>,

    /// Override the timing strategy (dynamic|scheduler|hybrid).
    #[arg(long = "timing", value_name = "STRATEGY", global = true)]
    pub timing: Option<String>,

    /// Override the scan interval.
    #[arg(long = "scheduler-interval-seconds", value_name = "SECONDS", global = true)]
    pub scheduler_interval_seconds: Option<u64>,

    /// Include hidden records in transition lookups.
    #[arg(
        long = "include-hidden",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub include_hidden: Option<bool>,

    /// Override the purge endpoint URL.
    #[arg(long = "purge-url", value_name = "URL", global = true)]
    pub purge_url: Option<String>,
}
