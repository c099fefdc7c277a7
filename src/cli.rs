// src/cli.rs

//! Command line of the `buildexec` binary (`clap` derive).

use clap::{Parser, ValueEnum};

/// Command-line arguments for `buildexec`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "buildexec",
    version,
    about = "Run configured jobs on a node's executor slots.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Buildexec.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Buildexec.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BUILDEXEC_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Override `[node].executors` from the config file.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub executors: Option<u16>,

    /// Only run these jobs (repeatable). Runs every configured job if omitted.
    #[arg(long = "job", value_name = "NAME")]
    pub jobs: Vec<String>,

    /// Parse + validate, print the node and jobs, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    /// Arguments for running `config` with no overrides.
    pub fn for_config(config: impl Into<String>) -> Self {
        Self {
            config: config.into(),
            log_level: None,
            executors: None,
            jobs: Vec::new(),
            dry_run: false,
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
