// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! The `local` source kind: stages a project-relative file or directory verbatim, grounded on
//! `plugins/sources/local.py`'s `LocalSource`. Always resolved and always cached, since there is
//! no ref to track against an upstream.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_yaml::Value;

use crate::error::{PluginError, Result};
use crate::source::{Source, SourceConsistency};

pub struct LocalSource {
    project_directory: PathBuf,
    path: Option<PathBuf>,
}

impl LocalSource {
    pub fn new(project_directory: impl Into<PathBuf>) -> Self {
        LocalSource {
            project_directory: project_directory.into(),
            path: None,
        }
    }

    fn full_path(&self) -> Result<&Path> {
        self.path
            .as_deref()
            .ok_or_else(|| PluginError::InvalidData("local source was never configured".to_string()))
    }
}

#[async_trait]
impl Source for LocalSource {
    fn configure(&mut self, node: &Value) -> Result<()> {
        let path = node
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| PluginError::InvalidData("local source requires a 'path'".to_string()))?;
        self.path = Some(self.project_directory.join(path));
        Ok(())
    }

    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    fn get_unique_key(&self) -> serde_json::Value {
        serde_json::json!({ "path": self.path.as_ref().map(|p| p.to_string_lossy().into_owned()) })
    }

    fn get_consistency(&self) -> SourceConsistency {
        SourceConsistency::Cached
    }

    // We don't have a ref; we're a local file.
    fn load_ref(&mut self, _node: &Value) -> Result<()> {
        Ok(())
    }

    fn get_ref(&self) -> Option<Value> {
        None
    }

    fn set_ref(&mut self, _reference: Value, _node: &mut Value) -> Result<()> {
        Ok(())
    }

    async fn track(&mut self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn fetch(&mut self) -> Result<()> {
        // Nothing to mirror; the content already lives in the project directory.
        Ok(())
    }

    /// `directory` is the destination directory, not a file path: a directory source stages its
    /// contents into `directory`; a single-file source stages itself as `directory/<basename>`.
    fn stage(&self, directory: &Path) -> Result<()> {
        let source = self.full_path()?;
        std::fs::create_dir_all(directory)?;
        if std::fs::symlink_metadata(source)?.is_dir() {
            copy_recursive(source, directory)
        } else {
            let name = source
                .file_name()
                .ok_or_else(|| PluginError::InvalidData("local source path has no file name".to_string()))?;
            copy_recursive(source, &directory.join(name))
        }
    }
}

fn copy_recursive(src: &Path, dest: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(src)?;
    if metadata.is_dir() {
        std::fs::create_dir_all(dest)?;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
        }
    } else if metadata.file_type().is_symlink() {
        let target = std::fs::read_link(src)?;
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, dest)?;
    } else {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src, dest)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stages_a_single_file_verbatim() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("hello.txt"), b"hello\n").unwrap();

        let node: Value = serde_yaml::from_str("kind: local\npath: hello.txt\n").unwrap();
        let mut source = LocalSource::new(project.path());
        source.configure(&node).unwrap();
        assert_eq!(source.get_consistency(), SourceConsistency::Cached);

        let staged = tempfile::tempdir().unwrap();
        source.stage(staged.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(staged.path().join("hello.txt")).unwrap(),
            "hello\n"
        );
    }

    #[tokio::test]
    async fn stages_a_directory_recursively() {
        let project = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(project.path().join("files/nested")).unwrap();
        std::fs::write(project.path().join("files/a.txt"), b"a").unwrap();
        std::fs::write(project.path().join("files/nested/b.txt"), b"b").unwrap();

        let node: Value = serde_yaml::from_str("kind: local\npath: files\n").unwrap();
        let mut source = LocalSource::new(project.path());
        source.configure(&node).unwrap();

        let staged = tempfile::tempdir().unwrap();
        source.stage(staged.path()).unwrap();
        assert_eq!(std::fs::read_to_string(staged.path().join("a.txt")).unwrap(), "a");
        assert_eq!(
            std::fs::read_to_string(staged.path().join("nested/b.txt")).unwrap(),
            "b"
        );
    }

    #[test]
    fn missing_path_key_is_rejected() {
        let node: Value = serde_yaml::from_str("kind: local\n").unwrap();
        let mut source = LocalSource::new(".");
        assert!(source.configure(&node).is_err());
    }
}
