// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! The object-safe sandbox contract an `Element` runs its commands against. Defined here
//! (rather than in the `sandbox` crate) so `plugin` does not need to depend on its concrete
//! implementation; `sandbox::LocalSandbox` implements this trait.
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct MountFlags {
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunFlags {
    pub root_read_only: bool,
    pub network_enabled: bool,
    pub user_namespace: bool,
}

pub trait Sandbox: Send + Sync {
    /// Declares a mount point. Marking is idempotent; overlapping marks are rejected by the
    /// implementation.
    fn mark_directory(&mut self, path: &str, flags: MountFlags) -> Result<()>;

    /// Runs a command inside the sandbox, returning its exit code.
    fn run(
        &mut self,
        argv: &[String],
        flags: RunFlags,
        cwd: Option<&str>,
        env: &BTreeMap<String, String>,
    ) -> Result<i32>;

    /// The sandbox's root directory on the host, for staging content into it directly.
    fn host_root(&self) -> &Path;
}
