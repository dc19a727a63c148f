use std::io::{self, Write};

use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};

use ctxq_core::SchedulerConfig;
use ctxq_scheduler::SchedulerEvent;

use crate::runner::{RunReport, TraceKind, TraceRecord};

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const STARTED: Color = Color::Cyan;
    const SUCCESS: Color = Color::Green;
    const FAILURE: Color = Color::Red;
    const CANCELLED: Color = Color::Yellow;
    const STEP: Color = Color::Magenta;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Renders run traces and config summaries to stdout.
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    pub fn print_report(&self, report: &RunReport) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("trace\n"),
            ResetColor,
        )?;
        for record in &report.records {
            let (color, line) = describe(record);
            execute!(
                stdout,
                SetForegroundColor(Colors::DIM),
                Print(format!("{:>6}ms  ", record.at_ms)),
                SetForegroundColor(color),
                Print(line),
                Print("\n"),
                ResetColor,
            )?;
        }

        if !report.drained {
            self.print_error("some contexts were still executing when the run ended")?;
        }
        for (context, count) in &report.leftover {
            self.print_info(&format!("{context}: {count} task(s) never ran"))?;
        }
        stdout.flush()?;
        Ok(())
    }

    /// One JSON object per line.
    pub fn print_json(&self, records: &[TraceRecord]) -> Result<()> {
        let mut stdout = io::stdout().lock();
        for record in records {
            writeln!(stdout, "{}", serde_json::to_string(record)?)?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_contexts(&self, config: &SchedulerConfig) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print(format!("{} context(s)\n", config.contexts.len())),
            ResetColor,
        )?;
        for ctx in &config.contexts {
            let marker = if config.current.as_deref() == Some(ctx.name.as_str()) {
                "*"
            } else {
                " "
            };
            execute!(
                stdout,
                Print(format!("{marker} {:<14}", ctx.name)),
                SetForegroundColor(Colors::DIM),
                Print(format!("[{}]", ctx.priorities.join(" > "))),
                Print(
                    ctx.watchdog()
                        .map(|d| format!(" watchdog {}ms", d.as_millis()))
                        .unwrap_or_default()
                ),
                Print("\n"),
                ResetColor,
            )?;
        }
        if config.activate {
            self.print_info("manager activates on startup")?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_error(&self, msg: &str) -> Result<()> {
        let mut stderr = io::stderr();
        execute!(
            stderr,
            SetForegroundColor(Colors::FAILURE),
            Print(format!("Error: {}\n", msg)),
            ResetColor,
        )?;
        Ok(())
    }

    pub fn print_info(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{}\n", msg)),
            ResetColor,
        )?;
        Ok(())
    }
}

fn describe(record: &TraceRecord) -> (Color, String) {
    match &record.kind {
        TraceKind::Enqueued { task, context, priority } => {
            (Colors::DIM, format!("enqueue  {context}/{task} ({priority})"))
        }
        TraceKind::Started { task, context } => (Colors::STARTED, format!("start    {context}/{task}")),
        TraceKind::Finished { task, context, success: true } => {
            (Colors::SUCCESS, format!("done     {context}/{task}"))
        }
        TraceKind::Finished { task, context, success: false } => {
            (Colors::FAILURE, format!("failed   {context}/{task}"))
        }
        TraceKind::Cancelled { task, context } => {
            (Colors::CANCELLED, format!("cancel   {context}/{task}"))
        }
        TraceKind::Step { action } => (Colors::STEP, format!("step     {action}")),
        TraceKind::Event { event } => (Colors::DIM, format!("event    {}", describe_event(event))),
        TraceKind::Rejected { reason } => (Colors::FAILURE, format!("rejected {reason}")),
    }
}

fn describe_event(event: &SchedulerEvent) -> String {
    match event {
        SchedulerEvent::ContextChanged { old, new } => {
            format!("context {} -> {new}", old.as_deref().unwrap_or("(none)"))
        }
        SchedulerEvent::ActiveChanged { active: true } => "manager active".to_string(),
        SchedulerEvent::ActiveChanged { active: false } => "manager inactive".to_string(),
    }
}
