use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Drive the context-scoped task scheduler from scripted plans.
#[derive(Parser, Debug)]
#[command(name = "ctxq", about = "Context-scoped priority task scheduler")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a plan of scripted tasks and timed steps, then print the trace.
    Run {
        /// Plan file (TOML)
        #[arg(long)]
        plan: PathBuf,

        /// Scheduler config (default: the plan's [scheduler] table, then
        /// ~/.config/ctxq/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the trace as JSON lines instead of colored text
        #[arg(long)]
        json: bool,
    },

    /// Validate a scheduler config and list its contexts.
    Check {
        /// Scheduler config (TOML)
        #[arg(long)]
        config: PathBuf,
    },
}
