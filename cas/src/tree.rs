// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use hashing::Digest;
use prost::Message;

/// One child of a `Directory` object, as passed to `Store::add_tree`.
#[derive(Clone, Debug)]
pub enum TreeEntry {
    File {
        name: String,
        digest: Digest,
        is_executable: bool,
    },
    Directory {
        name: String,
        digest: Digest,
    },
    Symlink {
        name: String,
        target: String,
    },
}

impl TreeEntry {
    fn name(&self) -> &str {
        match self {
            TreeEntry::File { name, .. } => name,
            TreeEntry::Directory { name, .. } => name,
            TreeEntry::Symlink { name, .. } => name,
        }
    }
}

/// Serializes a list of children into the canonical, deterministic byte form of a `Directory`
/// protobuf object: entries are sorted by name within each of the three kinds, independent of
/// the order `entries` was given in, so that two calls with the same set of children always
/// produce the same bytes (and therefore the same digest).
pub fn encode_directory(mut entries: Vec<TreeEntry>) -> Vec<u8> {
    entries.sort_by(|a, b| a.name().cmp(b.name()));

    let mut directory = protos::gen::Directory::default();
    for entry in entries {
        match entry {
            TreeEntry::File {
                name,
                digest,
                is_executable,
            } => directory.files.push(protos::gen::FileNode {
                name,
                digest: Some((&digest).into()),
                is_executable,
            }),
            TreeEntry::Directory { name, digest } => {
                directory.directories.push(protos::gen::DirectoryNode {
                    name,
                    digest: Some((&digest).into()),
                })
            }
            TreeEntry::Symlink { name, target } => {
                directory.symlinks.push(protos::gen::SymlinkNode { name, target })
            }
        }
    }
    directory.encode_to_vec()
}

/// Parses the bytes of a stored `Directory` object back into its children, for tree-walking
/// operations (e.g. the eviction sweep's mtime-touch on a resolved reference's full tree, or the
/// sandbox's dependency-staging walk).
pub fn decode_directory(bytes: &[u8]) -> Result<Vec<TreeEntry>, String> {
    let directory =
        protos::gen::Directory::decode(bytes).map_err(|e| format!("invalid Directory object: {e}"))?;
    let mut entries = Vec::with_capacity(
        directory.files.len() + directory.directories.len() + directory.symlinks.len(),
    );
    for file in directory.files {
        let digest = protos::require_digest(file.digest.as_ref())?;
        entries.push(TreeEntry::File {
            name: file.name,
            digest,
            is_executable: file.is_executable,
        });
    }
    for dir in directory.directories {
        let digest = protos::require_digest(dir.digest.as_ref())?;
        entries.push(TreeEntry::Directory {
            name: dir.name,
            digest,
        });
    }
    for symlink in directory.symlinks {
        entries.push(TreeEntry::Symlink {
            name: symlink.name,
            target: symlink.target,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_order_independent() {
        let a = vec![
            TreeEntry::File {
                name: "b.txt".to_string(),
                digest: Digest::of_bytes(b"b"),
                is_executable: false,
            },
            TreeEntry::File {
                name: "a.txt".to_string(),
                digest: Digest::of_bytes(b"a"),
                is_executable: false,
            },
        ];
        let b = vec![a[1].clone(), a[0].clone()];
        assert_eq!(encode_directory(a), encode_directory(b));
    }

    #[test]
    fn round_trips_through_decode() {
        let entries = vec![
            TreeEntry::Directory {
                name: "subdir".to_string(),
                digest: Digest::of_bytes(b"subdir contents"),
            },
            TreeEntry::Symlink {
                name: "link".to_string(),
                target: "subdir/a.txt".to_string(),
            },
        ];
        let bytes = encode_directory(entries);
        let decoded = decode_directory(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
    }
}
