use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use ctxq_core::SchedulerConfig;

/// Return the default config directory path: ~/.config/ctxq/
pub fn default_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("could not determine user config directory")?
        .join("ctxq");
    Ok(config_dir)
}

/// Return the default config file path.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join("config.toml"))
}

pub fn load_file(path: &Path) -> Result<SchedulerConfig> {
    debug!(path = %path.display(), "loading scheduler config");
    SchedulerConfig::from_file(path)
        .with_context(|| format!("failed to load scheduler config: {}", path.display()))
}

/// Pick the scheduler config for a run.
/// Priority: explicit path > the plan's inline table > default path.
pub fn resolve(explicit: Option<&Path>, inline: Option<&SchedulerConfig>) -> Result<SchedulerConfig> {
    if let Some(path) = explicit {
        return load_file(path);
    }

    if let Some(inline) = inline {
        debug!("using scheduler config from plan");
        let mut config = inline.clone();
        config.apply_env_overrides();
        config.validate().context("invalid [scheduler] table in plan")?;
        return Ok(config);
    }

    let path = default_config_path()?;
    if path.exists() {
        load_file(&path)
    } else {
        anyhow::bail!(
            "no scheduler config: pass --config, add a [scheduler] table to the plan, or create {}",
            path.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use ctxq_core::ContextConfig;

    use super::*;

    #[test]
    fn inline_config_is_validated() {
        let mut inline = SchedulerConfig::default();
        inline.contexts.push(ContextConfig::new("Popup", ["High"]));
        inline.contexts.push(ContextConfig::new("Popup", ["Low"]));
        let err = resolve(None, Some(&inline)).unwrap_err();
        assert!(format!("{err:#}").contains("more than once"));
    }

    #[test]
    fn explicit_path_wins() {
        let path = std::env::temp_dir().join(format!("ctxq-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[[contexts]]\nname = \"FromFile\"\npriorities = [\"A\"]").unwrap();

        let mut inline = SchedulerConfig::default();
        inline.contexts.push(ContextConfig::new("Inline", ["A"]));

        let config = resolve(Some(&path), Some(&inline)).unwrap();
        assert!(config.context("FromFile").is_some());
        assert!(config.context("Inline").is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
