use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::priority::PriorityOrder;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Top-level config ──────────────────────────────────────────

/// Scheduler setup: the contexts to create and the initial manager state.
///
/// Parsed from TOML, then env overrides are applied and the result is
/// validated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Context made current once all contexts exist.
    #[serde(default)]
    pub current: Option<String>,

    /// Activate the manager after setup.
    #[serde(default)]
    pub activate: bool,

    /// Contexts in creation order.
    #[serde(default)]
    pub contexts: Vec<ContextConfig>,
}

/// One named execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    pub name: String,

    /// Priority tokens, most urgent first.
    #[serde(default)]
    pub priorities: Vec<String>,

    /// Cancel an active task that runs longer than this.
    #[serde(default)]
    pub watchdog_ms: Option<u64>,
}

impl ContextConfig {
    pub fn new(name: impl Into<String>, priorities: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            priorities: priorities.into_iter().map(Into::into).collect(),
            watchdog_ms: None,
        }
    }

    pub fn priority_order(&self) -> PriorityOrder<String> {
        PriorityOrder::new(self.priorities.clone())
    }

    pub fn watchdog(&self) -> Option<Duration> {
        self.watchdog_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

impl SchedulerConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, CoreError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn context(&self, name: &str) -> Option<&ContextConfig> {
        self.contexts.iter().find(|c| c.name == name)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Profile is read from `CTXQ_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    /// - `CTXQ_CURRENT_CONTEXT` -> `current`
    /// - `CTXQ_ACTIVATE` -> `activate`
    pub fn apply_env_overrides(&mut self) {
        let profile = env_opt("CTXQ_PROFILE").unwrap_or_default().to_uppercase();
        self.apply_overrides(|key| profiled_env_opt(&profile, key));
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CTXQ_CURRENT_CONTEXT") {
            self.current = Some(v);
        }
        if let Some(v) = lookup("CTXQ_ACTIVATE") {
            match parse_bool(&v) {
                Some(flag) => self.activate = flag,
                None => tracing::warn!(value = %v, "ignoring unparseable CTXQ_ACTIVATE"),
            }
        }
    }

    // ── Validation ──────────────────────────────────────────────────

    /// Reject empty or duplicate context names and an unknown `current`.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut seen = HashSet::new();
        for ctx in &self.contexts {
            if ctx.name.trim().is_empty() {
                return Err(CoreError::Config("context name must not be empty".into()));
            }
            if !seen.insert(ctx.name.as_str()) {
                return Err(CoreError::Config(format!(
                    "context '{}' is defined more than once",
                    ctx.name
                )));
            }
        }

        if let Some(current) = &self.current {
            if !seen.contains(current.as_str()) {
                return Err(CoreError::Config(format!(
                    "current context '{current}' is not defined"
                )));
            }
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            "Scheduler config: {} context(s), current={}, activate={}",
            self.contexts.len(),
            self.current.as_deref().unwrap_or("(none)"),
            self.activate
        );
        for ctx in &self.contexts {
            tracing::info!(
                "  {:<14} priorities=[{}]{}",
                ctx.name,
                ctx.priorities.join(", "),
                ctx.watchdog_ms
                    .map(|ms| format!(" watchdog={ms}ms"))
                    .unwrap_or_default()
            );
        }
    }
}
