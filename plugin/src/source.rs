// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::path::Path;

use async_trait::async_trait;
use serde_yaml::Value;

use crate::error::Result;

/// Observed state of a source's ref, per the contract's `get_consistency()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceConsistency {
    Inconsistent,
    Resolved,
    Cached,
}

/// A source plugin: resolves a ref, fetches its content into a mirror, and stages it into a
/// sandbox. Implementations may block on I/O; the core calls these from worker threads.
#[async_trait]
pub trait Source: Send + Sync {
    /// Parses kind-specific configuration. Fails `InvalidData` on unrecognized keys.
    fn configure(&mut self, node: &Value) -> Result<()>;

    /// Checks host prerequisites (tools present, ports reachable).
    fn preflight(&self) -> Result<()>;

    /// A pure function of configured state; part of the owning element's cache key.
    fn get_unique_key(&self) -> serde_json::Value;

    fn get_consistency(&self) -> SourceConsistency;

    /// Loads a previously-resolved ref from the element's YAML node.
    fn load_ref(&mut self, node: &Value) -> Result<()>;

    fn get_ref(&self) -> Option<Value>;

    /// Writes a ref back into `node`, for tracking round-trips.
    fn set_ref(&mut self, reference: Value, node: &mut Value) -> Result<()>;

    /// Consults upstream and returns a new ref (e.g. the latest commit), or `None` if the
    /// current ref is already the latest.
    async fn track(&mut self) -> Result<Option<String>>;

    /// Ensures the content for the current ref is present in the local mirror directory.
    async fn fetch(&mut self) -> Result<()>;

    /// Materializes the content into `directory`.
    fn stage(&self, directory: &Path) -> Result<()>;

    /// Like `stage`, but retains VCS metadata so a user can edit the checkout in place.
    fn init_workspace(&self, directory: &Path) -> Result<()> {
        self.stage(directory)
    }
}
