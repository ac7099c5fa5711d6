// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(clippy::all)]

mod assembly;
mod determinism;
mod error;
mod local;
mod stage;

pub use assembly::{assemble_element, DependencyArtifact};
pub use error::{OverlapAction, Result, SandboxError};
pub use local::LocalSandbox;
pub use stage::{collect_tree_from, stage_tree_into};
