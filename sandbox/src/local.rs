// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! A sandbox backed by a plain host directory, grounded on `process_execution/src/local.rs`'s
//! `create_sandbox`/`AsyncDropSandbox`: a tempdir-per-invocation that is deleted on drop unless
//! explicitly retained (here, on build failure, for introspection per spec §4.6 step 5).
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use plugin::{MountFlags, PluginError, RunFlags, Sandbox};

use crate::error::Result;

pub struct LocalSandbox {
    root: PathBuf,
    tempdir: Option<tempfile::TempDir>,
    marks: Vec<String>,
}

impl LocalSandbox {
    pub fn new(base_directory: &Path) -> Result<LocalSandbox> {
        let tempdir = tempfile::Builder::new()
            .prefix("buildstream-sandbox-")
            .tempdir_in(base_directory)?;
        let root = tempdir.path().to_path_buf();
        Ok(LocalSandbox {
            root,
            tempdir: Some(tempdir),
            marks: Vec::new(),
        })
    }

    /// Consumes the tempdir handle without deleting it, so the sandbox contents survive for
    /// introspection after a failed build.
    pub fn keep(&mut self) {
        if let Some(tempdir) = self.tempdir.take() {
            let _ = tempdir.into_path();
        }
    }

    fn host_path(&self, sandbox_path: &str) -> PathBuf {
        self.root.join(sandbox_path.trim_start_matches('/'))
    }
}

impl Sandbox for LocalSandbox {
    fn mark_directory(&mut self, path: &str, _flags: MountFlags) -> plugin::Result<()> {
        if self
            .marks
            .iter()
            .any(|existing| path.starts_with(existing.as_str()) || existing.starts_with(path))
        {
            return Err(PluginError::Sandbox(format!(
                "directory mark '{path}' overlaps an existing mark"
            )));
        }
        std::fs::create_dir_all(self.host_path(path))?;
        self.marks.push(path.to_string());
        Ok(())
    }

    fn run(
        &mut self,
        argv: &[String],
        flags: RunFlags,
        cwd: Option<&str>,
        env: &BTreeMap<String, String>,
    ) -> plugin::Result<i32> {
        let Some((program, rest)) = argv.split_first() else {
            return Ok(0);
        };
        let mut command = Command::new(program);
        command.args(rest);
        command.current_dir(self.host_path(cwd.unwrap_or("/")));
        command.env_clear();
        command.envs(env);
        if flags.network_enabled {
            command.env("BST_NETWORK_ENABLED", "1");
        }
        let status = command.status()?;
        Ok(status.code().unwrap_or(-1))
    }

    fn host_root(&self) -> &Path {
        &self.root
    }
}
