// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! The source-kind registry. Individual source plugins (git, tar, pip...) are out of scope here;
//! only the `local` kind lives in-tree, in the `plugin` crate itself.
use std::path::Path;

use plugin::Source;

use crate::error::CliError;

pub fn build_source(kind: &str, project_directory: &Path) -> Result<Box<dyn Source>, CliError> {
    match kind {
        "local" => Ok(Box::new(plugin::LocalSource::new(project_directory))),
        other => Err(CliError::UnsupportedSourceKind(other.to_string())),
    }
}
