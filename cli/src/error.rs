// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("unsupported source kind '{0}' (only 'local' is built into this CLI)")]
    UnsupportedSourceKind(String),

    #[error("element '{0}' was requested but never appears in the loaded graph")]
    UnknownElement(String),

    #[error("no artifact remotes are configured in project.conf")]
    NoArtifactRemotes,

    #[error(transparent)]
    Load(#[from] loader::LoadError),

    #[error(transparent)]
    Context(#[from] context::ContextError),

    #[error(transparent)]
    Cas(#[from] cas::CasError),

    #[error(transparent)]
    Remote(#[from] cas_remote::RemoteError),

    #[error(transparent)]
    Plugin(#[from] plugin::PluginError),

    #[error(transparent)]
    Sandbox(#[from] sandbox::SandboxError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
