// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! Resolved, process-wide configuration: cache directory, source mirror directory, log
//! directory, queue sizes, the error-action policy, and log format.
//!
//! Layered the way `options::build_root`/`options::config` layer theirs: built-in defaults, then
//! a user config file (if one exists), then explicit overrides (the CLI's `-o`-style flags,
//! applied last and unconditionally).
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ContextError, Result};

const SENTINEL_FILES: &[&str] = &["buildstream.conf", ".bstproject.yaml"];

/// How the scheduler reacts when an element fails (`sched.on-error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnErrorPolicy {
    Continue,
    Quit,
    Terminate,
    Interactive,
}

impl OnErrorPolicy {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "continue" => Ok(OnErrorPolicy::Continue),
            "quit" => Ok(OnErrorPolicy::Quit),
            "terminate" => Ok(OnErrorPolicy::Terminate),
            "interactive" => Ok(OnErrorPolicy::Interactive),
            other => Err(ContextError::InvalidOnError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Plain,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "plain" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            other => Err(ContextError::InvalidLogFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub source_dir: PathBuf,
    pub log_dir: PathBuf,
    pub fetchers: usize,
    pub builders: usize,
    pub pushers: usize,
    pub network_retries: u32,
    pub on_error: OnErrorPolicy,
    pub log_format: LogFormat,
}

/// Mirrors the on-disk shape of a user config file; every field optional since a user config is
/// layered on top of, not instead of, the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserConfig {
    cachedir: Option<String>,
    sourcedir: Option<String>,
    logdir: Option<String>,
    #[serde(rename = "scheduler")]
    scheduler: SchedulerConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SchedulerConfig {
    fetchers: Option<usize>,
    builders: Option<usize>,
    pushers: Option<usize>,
    #[serde(rename = "network-retries")]
    network_retries: Option<u32>,
    #[serde(rename = "on-error")]
    on_error: Option<String>,
}

impl Config {
    /// Built-in defaults, rooted under the user's XDG cache/state directories the way
    /// `dirs_next::cache_dir()` resolves them, falling back to `.bst` under the cwd if no home
    /// directory can be found (e.g. in a minimal container).
    pub fn defaults() -> Config {
        let base = dirs_next::cache_dir().unwrap_or_else(|| PathBuf::from(".bst-cache"));
        Config {
            cache_dir: base.join("buildstream"),
            source_dir: base.join("buildstream/sources"),
            log_dir: base.join("buildstream/logs"),
            fetchers: 4,
            builders: 4,
            pushers: 4,
            network_retries: 3,
            on_error: OnErrorPolicy::Continue,
            log_format: LogFormat::Plain,
        }
    }

    /// Walks upward from `start` looking for a user config file, merges it over the defaults if
    /// found, and returns the result. Silent if no config file exists anywhere above `start`.
    pub fn load(start: &Path) -> Result<Config> {
        let mut config = Config::defaults();
        if let Some(path) = locate_user_config(start) {
            config.merge_file(&path)?;
        }
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|source| ContextError::ReadConfig {
            path: path.display().to_string(),
            source,
        })?;
        let user: UserConfig =
            serde_yaml::from_str(&text).map_err(|source| ContextError::ParseConfig {
                path: path.display().to_string(),
                source,
            })?;
        if let Some(dir) = user.cachedir {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(dir) = user.sourcedir {
            self.source_dir = PathBuf::from(dir);
        }
        if let Some(dir) = user.logdir {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(n) = user.scheduler.fetchers {
            self.fetchers = n;
        }
        if let Some(n) = user.scheduler.builders {
            self.builders = n;
        }
        if let Some(n) = user.scheduler.pushers {
            self.pushers = n;
        }
        if let Some(n) = user.scheduler.network_retries {
            self.network_retries = n;
        }
        if let Some(policy) = user.scheduler.on_error {
            self.on_error = OnErrorPolicy::parse(&policy)?;
        }
        Ok(())
    }

    /// Applies CLI-style `key=value` overrides (e.g. `scheduler.on-error=quit`), unconditionally
    /// replacing whatever the defaults/user config set. Unknown keys are rejected.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, String>) -> Result<()> {
        for (key, value) in overrides {
            match key.as_str() {
                "cachedir" => self.cache_dir = PathBuf::from(value),
                "sourcedir" => self.source_dir = PathBuf::from(value),
                "logdir" => self.log_dir = PathBuf::from(value),
                "scheduler.fetchers" => self.fetchers = parse_usize(key, value)?,
                "scheduler.builders" => self.builders = parse_usize(key, value)?,
                "scheduler.pushers" => self.pushers = parse_usize(key, value)?,
                "scheduler.network-retries" => self.network_retries = parse_u32(key, value)?,
                "scheduler.on-error" => self.on_error = OnErrorPolicy::parse(value)?,
                "ui.log-format" => self.log_format = LogFormat::parse(value)?,
                _ => return Err(ContextError::InvalidOnError(format!("unknown option '{key}'"))),
            }
        }
        Ok(())
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| ContextError::InvalidOnError(format!("'{key}' expects an integer, got '{value}'")))
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| ContextError::InvalidOnError(format!("'{key}' expects an integer, got '{value}'")))
}

fn locate_user_config(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        for sentinel in SENTINEL_FILES {
            let candidate = current.join(sentinel);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        if !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_four_workers_per_queue() {
        let config = Config::defaults();
        assert_eq!(config.fetchers, 4);
        assert_eq!(config.builders, 4);
        assert_eq!(config.pushers, 4);
        assert_eq!(config.on_error, OnErrorPolicy::Continue);
    }

    #[test]
    fn user_config_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("buildstream.conf"),
            "cachedir: /tmp/custom\nscheduler:\n  fetchers: 9\n  on-error: quit\n",
        )
        .unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let config = Config::load(&nested).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/custom"));
        assert_eq!(config.fetchers, 9);
        assert_eq!(config.on_error, OnErrorPolicy::Quit);
        assert_eq!(config.builders, 4);
    }

    #[test]
    fn explicit_overrides_win_over_user_config() {
        let mut config = Config::defaults();
        let mut overrides = BTreeMap::new();
        overrides.insert("scheduler.builders".to_string(), "2".to_string());
        config.apply_overrides(&overrides).unwrap();
        assert_eq!(config.builders, 2);
    }

    #[test]
    fn rejects_unknown_override_key() {
        let mut config = Config::defaults();
        let mut overrides = BTreeMap::new();
        overrides.insert("nonsense".to_string(), "1".to_string());
        assert!(config.apply_overrides(&overrides).is_err());
    }
}
