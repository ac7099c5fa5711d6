// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use async_trait::async_trait;
use serde_yaml::Value;

use crate::error::Result;
use crate::sandbox::Sandbox;

/// An element plugin: configures a sandbox, stages its own sources into it, and runs build
/// commands, producing the subpath within the sandbox whose contents become the artifact.
///
/// The sandbox-assembly pipeline (configure mounts, stage dependency artifacts, stage this
/// element's sources, run dependency integration commands) happens around these calls, not
/// inside them — `stage`/`assemble` only need to handle what is specific to this element.
#[async_trait]
pub trait Element: Send + Sync {
    /// Parses kind-specific configuration.
    fn configure(&mut self, node: &Value) -> Result<()>;

    fn preflight(&self) -> Result<()>;

    /// A pure function contributing to the strong cache key.
    fn get_unique_key(&self) -> serde_json::Value;

    /// Declares mount points and read-only roots this element needs.
    fn configure_sandbox(&self, sandbox: &mut dyn Sandbox) -> Result<()>;

    /// Stages this element's own sources into the sandbox.
    fn stage(&self, sandbox: &mut dyn Sandbox) -> Result<()>;

    /// Runs build commands, returning the subpath within the sandbox whose contents become the
    /// artifact.
    async fn assemble(&self, sandbox: &mut dyn Sandbox) -> Result<String>;

    /// Emits a reproducible build script, if this kind of element supports it.
    fn generate_script(&self) -> Option<String> {
        None
    }
}
