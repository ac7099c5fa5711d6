// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(clippy::all)]

mod build_element;
mod element;
mod error;
mod sandbox;
mod source;
mod source_local;

pub use build_element::{BuildElement, BUILD_ROOT, INSTALL_ROOT};
pub use element::Element;
pub use error::{PluginError, Result};
pub use sandbox::{MountFlags, RunFlags, Sandbox};
pub use source::{Source, SourceConsistency};
pub use source_local::LocalSource;
