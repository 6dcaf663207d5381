// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "PLANTDESK_LOG";

/// Filter from `PLANTDESK_LOG` when set, else `level` from the config.
/// HTTP internals are held at `warn` either way.
pub fn build_env_filter(level: &str, env_override: Option<&str>) -> Result<EnvFilter> {
    let base = env_override
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(level);

    let mut directives = vec![base.to_owned()];
    for noisy in ["hyper", "hyper_util", "reqwest", "rustls"] {
        directives.push(format!("{noisy}=warn"));
    }

    let filter = directives.join(",");
    EnvFilter::try_new(&filter).map_err(|error| anyhow!("invalid log filter {filter:?}: {error}"))
}

/// Send tracing output to `file`. The terminal belongs to the TUI, so
/// nothing is written to stdout or stderr.
pub fn init_logging(level: &str, file: &Path) -> Result<()> {
    let env_override = std::env::var(LOG_ENV).ok();
    let filter = build_env_filter(level, env_override.as_deref())?;

    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file)
        .with_context(|| format!("open log file {}", file.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(Mutex::new(log_file))
        .try_init()
        .map_err(|error| anyhow!("install log subscriber: {error}"))?;

    tracing::debug!(file = %file.display(), level, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::build_env_filter;

    #[test]
    fn env_override_wins_over_config_level() -> anyhow::Result<()> {
        let filter = build_env_filter("info", Some("plantdesk_tui=trace"))?;
        let rendered = filter.to_string();
        assert!(rendered.contains("plantdesk_tui=trace"));
        assert!(rendered.contains("reqwest=warn"));
        assert!(!rendered.contains("info"));
        Ok(())
    }

    #[test]
    fn blank_override_falls_back_to_config_level() -> anyhow::Result<()> {
        let filter = build_env_filter("debug", Some("  "))?;
        assert!(filter.to_string().contains("debug"));
        Ok(())
    }

    #[test]
    fn invalid_level_is_reported() {
        let error =
            build_env_filter("plantdesk=verbose", None).expect_err("bad directive should fail");
        assert!(error.to_string().contains("invalid log filter"));
    }
}
