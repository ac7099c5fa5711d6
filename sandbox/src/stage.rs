// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! Materializing a CAS tree into a sandbox directory, and collecting a sandbox directory back
//! into CAS with the determinism rules of spec §4.6 applied.
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use cas::{Digest, Store, TreeEntry};
use filetime::{set_file_mtime, FileTime};

use crate::determinism::{is_executable_mode, normalized_mode, FIXED_MTIME_SECONDS};
use crate::error::Result;

fn set_fixed_mtime(path: &Path) -> Result<()> {
    set_file_mtime(path, FileTime::from_unix_time(FIXED_MTIME_SECONDS, 0))?;
    Ok(())
}

/// Recursively writes the tree rooted at `digest` into `dest`, in the order its entries were
/// declared (directories and files interleaved as stored). Symlinks are created literally,
/// without following or validating their target. Boxed and explicitly pinned, like
/// `cas::Store::touch_tree`, since a recursive `async fn` cannot otherwise describe its own
/// future's size.
pub fn stage_tree_into<'a>(
    store: &'a Store,
    digest: Digest,
    dest: &'a Path,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(dest).await?;
        let entries = store.read_tree(digest).await?;
        for entry in entries {
            match entry {
                TreeEntry::File {
                    name,
                    digest,
                    is_executable,
                } => {
                    let path = dest.join(&name);
                    let bytes = store.read_blob_bytes(digest).await?;
                    tokio::fs::write(&path, &bytes).await?;
                    let mode = normalized_mode(is_executable);
                    tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).await?;
                    set_fixed_mtime(&path)?;
                }
                TreeEntry::Directory { name, digest } => {
                    let subdir = dest.join(&name);
                    stage_tree_into(store, digest, &subdir).await?;
                    set_fixed_mtime(&subdir)?;
                }
                TreeEntry::Symlink { name, target } => {
                    let path = dest.join(&name);
                    tokio::fs::symlink(&target, &path).await?;
                }
            }
        }
        set_fixed_mtime(dest)?;
        Ok(())
    })
}

/// Walks `dir` on disk and adds it to CAS as a `Directory` tree, applying the determinism rules:
/// modes normalized (setuid/setgid cleared unless the caller declared them permitted), no
/// extended attributes carried over, symlinks preserved literally. Returns the root tree digest.
pub fn collect_tree_from<'a>(
    store: &'a Store,
    dir: &'a Path,
) -> Pin<Box<dyn Future<Output = Result<Digest>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = Vec::new();
        let mut subdirs: Vec<(String, PathBuf)> = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type().await?;
            if file_type.is_symlink() {
                let target = tokio::fs::read_link(entry.path()).await?;
                entries.push(TreeEntry::Symlink {
                    name,
                    target: target.to_string_lossy().into_owned(),
                });
            } else if file_type.is_dir() {
                subdirs.push((name, entry.path()));
            } else {
                let metadata = entry.metadata().await?;
                let is_executable = is_executable_mode(metadata.permissions().mode());
                let bytes = tokio::fs::read(entry.path()).await?;
                let digest = store.add_blob(&bytes).await?;
                entries.push(TreeEntry::File {
                    name,
                    digest,
                    is_executable,
                });
            }
        }
        for (name, path) in subdirs {
            let digest = collect_tree_from(store, &path).await?;
            entries.push(TreeEntry::Directory { name, digest });
        }
        Ok(store.add_tree(entries).await?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cas::Store;

    async fn new_store(dir: &Path) -> Store {
        Store::new(dir, 0, 0).await.unwrap()
    }

    #[tokio::test]
    async fn round_trips_a_tree_through_stage_and_collect() {
        let cas_dir = tempfile::tempdir().unwrap();
        let store = new_store(cas_dir.path()).await;

        let file_digest = store.add_blob(b"hello").await.unwrap();
        let tree_digest = store
            .add_tree(vec![TreeEntry::File {
                name: "hello.txt".to_string(),
                digest: file_digest,
                is_executable: false,
            }])
            .await
            .unwrap();

        let staged = tempfile::tempdir().unwrap();
        stage_tree_into(&store, tree_digest, staged.path()).await.unwrap();
        assert!(staged.path().join("hello.txt").is_file());

        let collected = collect_tree_from(&store, staged.path()).await.unwrap();
        let entries = store.read_tree(collected).await.unwrap();
        assert_eq!(entries.len(), 1);
    }
}
