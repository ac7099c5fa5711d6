// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to read user config at {path}: {source}")]
    ReadConfig {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse user config at {path}: {source}")]
    ParseConfig {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("unknown on-error policy '{0}', expected one of continue, quit, terminate, interactive")]
    InvalidOnError(String),

    #[error("unknown log format '{0}', expected one of plain, json")]
    InvalidLogFormat(String),

    #[error(transparent)]
    Cas(#[from] cas::CasError),
}

pub type Result<T> = std::result::Result<T, ContextError>;
