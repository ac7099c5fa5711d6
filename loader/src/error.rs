// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::fmt;
use std::path::PathBuf;

/// Where in the source a load error was detected, when that location is known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub file: Option<PathBuf>,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(path) => write!(f, "{}", path.display()),
            None => write!(f, "<no provenance>"),
        }
    }
}

impl Provenance {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Provenance {
            file: Some(file.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{provenance}: file not found: {path}")]
    MissingFile { provenance: Provenance, path: String },

    #[error("{provenance}: invalid YAML: {message}")]
    InvalidYaml {
        provenance: Provenance,
        message: String,
    },

    #[error("{provenance}: invalid data: {message}")]
    InvalidData {
        provenance: Provenance,
        message: String,
    },

    #[error("circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    #[error("conflicting junction '{name}': {message}")]
    ConflictingJunction { name: String, message: String },

    #[error("source for '{element}' needs tracking before it can be loaded")]
    SubprojectFetchNeeded { element: String },

    #[error("subproject '{element}' has an inconsistent source")]
    SubprojectInconsistent { element: String },

    #[error("unresolved variable '{name}' in {provenance}")]
    UnresolvedVariable { name: String, provenance: Provenance },
}

pub type Result<T> = std::result::Result<T, LoadError>;
