// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("overlapping file path '{path}' from dependency staging ({policy:?})")]
    OverlappingStage { path: String, policy: OverlapAction },

    #[error(transparent)]
    Cas(#[from] cas::CasError),

    #[error(transparent)]
    Plugin(#[from] plugin::PluginError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapAction {
    Error,
    Warn,
    Ignore,
}

pub type Result<T> = std::result::Result<T, SandboxError>;
