// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! Bootstraps a `Loader` and a `Context` for one invocation, from a `-C` directory and `-o`
//! overrides.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use context::{Config, Context};
use loader::{JunctionResolver, LoadError, Loader, Result as LoadResult};

use crate::error::{CliError, Result};

/// Junction subprojects are out of scope for this CLI surface; any element that declares one
/// fails with the same error the loader itself would raise for a junction it cannot resolve.
pub struct NoJunctions;

impl JunctionResolver for NoJunctions {
    fn resolve(&self, junction_element: &str) -> LoadResult<PathBuf> {
        Err(LoadError::ConflictingJunction {
            name: junction_element.to_string(),
            message: "junction subprojects are not supported by this CLI".to_string(),
        })
    }
}

pub fn parse_overrides(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut overrides = BTreeMap::new();
    for entry in raw {
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            CliError::Context(context::ContextError::InvalidOnError(format!(
                "'-o {entry}' is not in key=value form"
            )))
        })?;
        overrides.insert(key.to_string(), value.to_string());
    }
    Ok(overrides)
}

pub async fn bootstrap_context(
    project_dir: &Path,
    overrides: &BTreeMap<String, String>,
) -> Result<(Context, tokio::sync::mpsc::UnboundedReceiver<context::Message>)> {
    let mut config = Config::load(project_dir)?;
    config.apply_overrides(overrides)?;
    Context::new(config).await.map_err(CliError::from)
}

pub fn bootstrap_loader<'r>(
    project_dir: &Path,
    resolver: &'r NoJunctions,
) -> Result<Loader<'r>> {
    Loader::new(project_dir, &BTreeMap::new(), &BTreeMap::new(), resolver).map_err(CliError::from)
}
