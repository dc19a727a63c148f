mod cli;
mod config;
mod plan;
mod runner;
mod terminal;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::cli::{CliArgs, Command};
use crate::plan::Plan;
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<()> {
    ctxq_core::load_dotenv();

    // stdout is reserved for the trace
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let terminal = Terminal::new();

    match args.command {
        Command::Run { plan, config, json } => {
            let plan = Plan::load(&plan)?;
            let config = config::resolve(config.as_deref(), plan.scheduler.as_ref())
                .context("failed to load configuration")?;
            config.log_summary();

            info!(tasks = plan.tasks.len(), steps = plan.steps.len(), "running plan");
            let report = runner::run(&plan, &config).await?;
            if json {
                terminal.print_json(&report.records)?;
            } else {
                terminal.print_report(&report)?;
            }
        }
        Command::Check { config } => {
            let config = config::load_file(&config)?;
            config.log_summary();
            terminal.print_contexts(&config)?;
        }
    }

    Ok(())
}
