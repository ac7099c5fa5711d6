// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("invalid plugin configuration: {0}")]
    InvalidData(String),

    #[error("preflight check failed: {0}")]
    Preflight(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("track failed: {0}")]
    Track(String),

    #[error("command '{command}' failed with exit code {exit_code}")]
    CommandFailed { command: String, exit_code: i32 },

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PluginError>;
