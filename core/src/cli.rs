use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line interface for the eventhub server.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Host for the HTTP listener.
    #[arg(long)]
    pub host: Option<String>,
    /// Port for the HTTP listener.
    #[arg(long)]
    pub port: Option<u16>,
    /// Comma separated channel ids, e.g. `1,2,3`.
    #[arg(long, value_delimiter = ',')]
    pub channels: Option<Vec<u32>>,
    /// Log filter directive (e.g. `debug`, `eventhub=trace`).
    #[arg(long)]
    pub log: Option<String>,
    /// Write logs to this file instead of stdout.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the long-poll server (default).
    Run,
    /// Print the configured channel ids and exit.
    Channels,
}
