// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! The sandbox assembly pipeline of spec §4.6: configure, stage dependencies, stage sources,
//! integrate, run, collect.
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use cas::{Digest, Store};
use plugin::{Element, RunFlags, Sandbox, Source};

use crate::error::{OverlapAction, Result, SandboxError};
use crate::local::LocalSandbox;
use crate::stage::{collect_tree_from, stage_tree_into};

/// One build dependency's artifact, in the stable order the scheduler already resolved it to.
pub struct DependencyArtifact {
    pub name: String,
    pub tree: Digest,
    /// Where to stage this dependency's tree; `/` unless the element declared otherwise.
    pub mount_point: String,
    /// Commands this dependency publishes to integrate itself into a sandbox that depends on it
    /// (e.g. `ldconfig`), run with this dependency's own environment.
    pub integration_commands: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

/// Runs the full assembly pipeline and returns the digest of the resulting output tree.
pub async fn assemble_element(
    store: &Store,
    base_directory: &Path,
    element: &dyn Element,
    sources: &[&dyn Source],
    sources_dir: &str,
    dependencies: &[DependencyArtifact],
    overlap_policy: OverlapAction,
) -> Result<Digest> {
    let mut sandbox = LocalSandbox::new(base_directory)?;

    element.configure_sandbox(&mut sandbox).map_err(SandboxError::from)?;

    let mut staged_paths: HashSet<String> = HashSet::new();
    for dependency in dependencies {
        stage_dependency(store, &mut sandbox, dependency, overlap_policy, &mut staged_paths).await?;
    }

    for dependency in dependencies {
        for command in &dependency.integration_commands {
            run_shell_command(&mut sandbox, command, &dependency.environment)?;
        }
    }

    sandbox_create_dir(&mut sandbox, sources_dir)?;
    for source in sources {
        source
            .stage(&sandbox.host_root().join(sources_dir.trim_start_matches('/')))
            .map_err(SandboxError::from)?;
    }
    element.stage(&mut sandbox).map_err(SandboxError::from)?;

    let output_path = match element.assemble(&mut sandbox).await {
        Ok(path) => path,
        Err(err) => {
            sandbox.keep();
            return Err(SandboxError::from(err));
        }
    };

    let output_dir = sandbox.host_root().join(output_path.trim_start_matches('/'));
    collect_tree_from(store, &output_dir).await
}

fn sandbox_create_dir(sandbox: &mut LocalSandbox, path: &str) -> Result<()> {
    std::fs::create_dir_all(sandbox.host_root().join(path.trim_start_matches('/')))?;
    Ok(())
}

async fn stage_dependency(
    store: &Store,
    sandbox: &mut LocalSandbox,
    dependency: &DependencyArtifact,
    overlap_policy: OverlapAction,
    staged_paths: &mut HashSet<String>,
) -> Result<()> {
    let incoming = list_file_paths(store, dependency.tree, &dependency.mount_point).await?;
    for path in &incoming {
        if !staged_paths.insert(path.clone()) {
            match overlap_policy {
                OverlapAction::Error => {
                    return Err(SandboxError::OverlappingStage {
                        path: path.clone(),
                        policy: overlap_policy,
                    })
                }
                OverlapAction::Warn => {
                    log::warn!(
                        "path '{path}' staged by dependency '{}' overlaps a previous dependency",
                        dependency.name
                    );
                }
                OverlapAction::Ignore => {}
            }
        }
    }
    let dest = sandbox
        .host_root()
        .join(dependency.mount_point.trim_start_matches('/'));
    stage_tree_into(store, dependency.tree, &dest).await?;
    Ok(())
}

fn list_file_paths<'a>(
    store: &'a Store,
    digest: Digest,
    prefix: &'a str,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<String>>> + Send + 'a>> {
    Box::pin(async move {
        let mut paths = Vec::new();
        for entry in store.read_tree(digest).await? {
            match entry {
                cas::TreeEntry::File { name, .. } | cas::TreeEntry::Symlink { name, .. } => {
                    paths.push(format!("{}/{}", prefix.trim_end_matches('/'), name));
                }
                cas::TreeEntry::Directory { name, digest } => {
                    let sub_prefix = format!("{}/{}", prefix.trim_end_matches('/'), name);
                    paths.extend(list_file_paths(store, digest, &sub_prefix).await?);
                }
            }
        }
        Ok(paths)
    })
}

fn run_shell_command(
    sandbox: &mut LocalSandbox,
    command: &str,
    environment: &BTreeMap<String, String>,
) -> Result<()> {
    let argv = vec![
        "sh".to_string(),
        "-c".to_string(),
        "-e".to_string(),
        format!("{command}\n"),
    ];
    let exit_code = sandbox.run(&argv, RunFlags::default(), None, environment)?;
    if exit_code != 0 {
        return Err(SandboxError::Plugin(plugin::PluginError::CommandFailed {
            command: command.to_string(),
            exit_code,
        }));
    }
    Ok(())
}
