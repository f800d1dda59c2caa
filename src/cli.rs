use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "warden", about = "A supervisor for external service processes", version)]
pub struct Cli {
    /// Path to the task definition file
    #[arg(long, global = true, default_value = "warden.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch services defined in warden.toml and supervise them until
    /// interrupted
    Run {
        /// Only launch the named tasks (all tasks when omitted)
        names: Vec<String>,
    },
    /// Parse and validate the task definition file without launching
    /// anything
    Check,
}
