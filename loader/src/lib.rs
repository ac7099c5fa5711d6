// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(clippy::all)]
#![allow(clippy::too_many_arguments)]

mod element;
mod error;
mod graph;
mod loader;
mod node;
mod options;
mod project;
mod types;
mod variables;

pub use element::{Element, SourceConsistency, SourceDeclaration};
pub use error::{LoadError, Provenance, Result};
pub use graph::{ElementId, Graph};
pub use loader::{JunctionResolver, Loader};
pub use node::{apply_option_conditionals, load_yaml_file, merge, resolve_includes};
pub use options::{OptionDeclarations, OptionValue};
pub use project::{locate_project_root, ArtifactRemote, OverlapPolicy, PluginOrigin, Project};
pub use types::{Dependency, DependencyType};
pub use variables::Variables;
