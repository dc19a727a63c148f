use std::fmt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use ctxq_core::SchedulerConfig;

/// A scripted scheduler session: tasks to enqueue and manager steps to
/// apply, each at a time offset from the start of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// How long to wait for running contexts to drain after the last entry.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Inline scheduler config, used when no --config is given.
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,

    #[serde(default)]
    pub tasks: Vec<PlannedTask>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_settle_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub name: String,
    pub context: String,
    pub priority: String,
    /// Simulated work time.
    #[serde(default)]
    pub duration_ms: u64,
    /// Finish with failure instead of success.
    #[serde(default)]
    pub fail: bool,
    /// Offset at which the task is enqueued.
    #[serde(default)]
    pub at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Switch { context: String },
    Activate,
    Deactivate,
    Stop { context: String },
    Clear { context: String },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Switch { context } => write!(f, "switch to {context}"),
            Action::Activate => f.write_str("activate"),
            Action::Deactivate => f.write_str("deactivate"),
            Action::Stop { context } => write!(f, "stop {context}"),
            Action::Clear { context } => write!(f, "clear {context}"),
        }
    }
}

/// One timeline entry, in the order it will be applied.
#[derive(Debug, Clone, Copy)]
pub enum Entry<'a> {
    Enqueue(&'a PlannedTask),
    Apply(&'a Action),
}

impl Plan {
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let plan: Self = toml::from_str(toml_str).context("failed to parse plan")?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading plan");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan: {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid plan: {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        for task in &self.tasks {
            if task.name.is_empty() {
                bail!("plan task names must not be empty");
            }
        }
        Ok(())
    }

    /// Tasks and steps merged by time offset. At equal offsets steps come
    /// before tasks, and each group keeps its file order.
    pub fn timeline(&self) -> Vec<(u64, Entry<'_>)> {
        let mut entries: Vec<(u64, u8, Entry<'_>)> = self
            .steps
            .iter()
            .map(|s| (s.at_ms, 0, Entry::Apply(&s.action)))
            .chain(self.tasks.iter().map(|t| (t.at_ms, 1, Entry::Enqueue(t))))
            .collect();
        entries.sort_by_key(|(at, group, _)| (*at, *group));
        entries.into_iter().map(|(at, _, e)| (at, e)).collect()
    }
}
