// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! The four `StageJob` implementations the pipeline drives: fetch, build, push, pull. A
//! `StageJob` only ever sees `&Element`, not the graph it came from, so cross-element state
//! (a dependency's resolved artifact) is threaded through a ledger keyed by element name rather
//! than by `ElementId`.
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cas::{Digest, Store};
use cas_remote::RemoteStore;
use context::{Message, MessageBus, MessageKind};
use loader::{ArtifactRemote, Element, OverlapPolicy};
use scheduler::{Outcome, StageJob};

use crate::sources::build_source;

/// What a prior build of one element resolved to, looked up by name when a dependent needs to
/// stage it.
#[derive(Clone)]
pub struct BuildRecord {
    pub strong_key: String,
    pub digest: Digest,
}

pub type Ledger = Arc<Mutex<HashMap<String, BuildRecord>>>;

pub fn new_ledger() -> Ledger {
    Arc::new(Mutex::new(HashMap::new()))
}

fn overlap_action(policy: OverlapPolicy) -> sandbox::OverlapAction {
    match policy {
        OverlapPolicy::Error => sandbox::OverlapAction::Error,
        OverlapPolicy::Warn => sandbox::OverlapAction::Warn,
        OverlapPolicy::Ignore => sandbox::OverlapAction::Ignore,
    }
}

pub struct FetchJob {
    pub project_dir: PathBuf,
}

#[async_trait]
impl StageJob for FetchJob {
    async fn run(&self, element: &Element) -> Outcome {
        for decl in &element.sources {
            let mut source = match build_source(&decl.kind, &self.project_dir) {
                Ok(source) => source,
                Err(e) => return Outcome::Failed(e.to_string()),
            };
            if let Err(e) = source.configure(&decl.config) {
                return Outcome::Failed(e.to_string());
            }
            if let Err(e) = source.fetch().await {
                return Outcome::TransientFail(e.to_string());
            }
        }
        Outcome::Success
    }
}

pub struct BuildJob {
    pub store: Arc<Store>,
    pub project_dir: PathBuf,
    pub sandbox_base: PathBuf,
    pub overlap_policy: OverlapPolicy,
    pub ledger: Ledger,
}

#[async_trait]
impl StageJob for BuildJob {
    async fn run(&self, element: &Element) -> Outcome {
        let mut dep_artifacts = Vec::new();
        let mut dep_strong_keys = Vec::new();
        {
            let ledger = self.ledger.lock().unwrap();
            for dep in element.build_dependencies() {
                let Some(record) = ledger.get(&dep.name) else {
                    return Outcome::Failed(format!(
                        "build dependency '{}' has no recorded artifact",
                        dep.name
                    ));
                };
                dep_strong_keys.push(record.strong_key.clone());
                dep_artifacts.push(sandbox::DependencyArtifact {
                    name: dep.name.clone(),
                    tree: record.digest,
                    mount_point: "/".to_string(),
                    integration_commands: Vec::new(),
                    environment: BTreeMap::new(),
                });
            }
        }

        let mut sources: Vec<Box<dyn plugin::Source>> = Vec::new();
        let mut source_fingerprints = Vec::new();
        for decl in &element.sources {
            let mut source = match build_source(&decl.kind, &self.project_dir) {
                Ok(source) => source,
                Err(e) => return Outcome::Failed(e.to_string()),
            };
            if let Err(e) = source.configure(&decl.config) {
                return Outcome::Failed(e.to_string());
            }
            source_fingerprints.push((decl.kind.clone(), source.get_unique_key()));
            sources.push(source);
        }

        let cacheable_environment: BTreeMap<String, String> = element
            .environment
            .iter()
            .filter(|(k, _)| !element.environment_nocache.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let config = match serde_json::to_value(&element.config) {
            Ok(v) => v,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        let public = match serde_json::to_value(&element.public) {
            Ok(v) => v,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        let sandbox_config = match serde_json::to_value(&element.sandbox) {
            Ok(v) => v,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        let inputs = cachekey::KeyInputs {
            kind: element.kind.clone(),
            variables: element.variables.as_map(),
            cacheable_environment,
            config,
            public,
            sandbox_config,
            source_fingerprints,
        };
        let strong = cachekey::strong_key(&inputs, &dep_strong_keys);

        let elements_ref = format!("elements/{}", element.name);
        let keys_ref = format!("keys/{strong}");

        if let Ok(digest) = self.store.resolve_ref(&keys_ref).await {
            self.ledger.lock().unwrap().insert(
                element.name.clone(),
                BuildRecord {
                    strong_key: strong.clone(),
                    digest,
                },
            );
            if let Err(e) = self.store.set_ref(&elements_ref, digest).await {
                return Outcome::Failed(e.to_string());
            }
            return Outcome::Success;
        }

        let mut build_element = plugin::BuildElement::new();
        if let Err(e) = build_element.configure(&element.config) {
            return Outcome::Failed(e.to_string());
        }
        build_element.set_environment(element.environment.clone());

        if let Err(e) = std::fs::create_dir_all(&self.sandbox_base) {
            return Outcome::Failed(e.to_string());
        }

        let source_refs: Vec<&dyn plugin::Source> = sources.iter().map(|s| s.as_ref()).collect();

        let digest = match sandbox::assemble_element(
            &self.store,
            &self.sandbox_base,
            &build_element,
            &source_refs,
            plugin::BUILD_ROOT,
            &dep_artifacts,
            overlap_action(self.overlap_policy),
        )
        .await
        {
            Ok(digest) => digest,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        if let Err(e) = self.store.set_ref(&keys_ref, digest).await {
            return Outcome::Failed(e.to_string());
        }
        if let Err(e) = self.store.set_ref(&elements_ref, digest).await {
            return Outcome::Failed(e.to_string());
        }
        self.ledger.lock().unwrap().insert(
            element.name.clone(),
            BuildRecord {
                strong_key: strong,
                digest,
            },
        );

        Outcome::Success
    }
}

/// Consults each declared source for a new ref and reports it over the bus. Does not rewrite the
/// element's `.bst` file in place; that editing surface is out of scope for this CLI.
pub struct TrackJob {
    pub project_dir: PathBuf,
    pub bus: MessageBus,
}

#[async_trait]
impl StageJob for TrackJob {
    async fn run(&self, element: &Element) -> Outcome {
        for decl in &element.sources {
            let mut source = match build_source(&decl.kind, &self.project_dir) {
                Ok(source) => source,
                Err(e) => return Outcome::Failed(e.to_string()),
            };
            if let Err(e) = source.configure(&decl.config) {
                return Outcome::Failed(e.to_string());
            }
            match source.track().await {
                Ok(Some(new_ref)) => {
                    self.bus.send(
                        Message::new(MessageKind::Info, "track", format!("{} has a new ref: {new_ref}", element.name))
                            .for_element(element.name.clone()),
                    );
                }
                Ok(None) => {}
                Err(e) => return Outcome::TransientFail(e.to_string()),
            }
        }
        Outcome::Success
    }
}

pub struct PushJob {
    pub store: Arc<Store>,
    pub remotes: Vec<ArtifactRemote>,
}

#[async_trait]
impl StageJob for PushJob {
    async fn run(&self, element: &Element) -> Outcome {
        let pushable: Vec<&ArtifactRemote> = self.remotes.iter().filter(|r| r.push).collect();
        if pushable.is_empty() {
            return Outcome::Success;
        }

        let elements_ref = format!("elements/{}", element.name);
        let digest = match self.store.resolve_ref(&elements_ref).await {
            Ok(digest) => digest,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        for remote in pushable {
            let client = match RemoteStore::connect(&remote.url, remote.instance_name.clone()).await {
                Ok(client) => client,
                Err(e) => return Outcome::TransientFail(e.to_string()),
            };
            if let Err(e) = push_tree(&self.store, &client, digest).await {
                return Outcome::TransientFail(e.to_string());
            }
            if let Err(e) = client.update_reference(&elements_ref, digest).await {
                return Outcome::TransientFail(e.to_string());
            }
        }
        Outcome::Success
    }
}

pub struct PullJob {
    pub store: Arc<Store>,
    pub remotes: Vec<ArtifactRemote>,
}

#[async_trait]
impl StageJob for PullJob {
    async fn run(&self, element: &Element) -> Outcome {
        let elements_ref = format!("elements/{}", element.name);
        if self.store.resolve_ref(&elements_ref).await.is_ok() {
            return Outcome::Success;
        }

        for remote in &self.remotes {
            let client = match RemoteStore::connect(&remote.url, remote.instance_name.clone()).await {
                Ok(client) => client,
                Err(_) => continue,
            };
            let digest = match client.get_reference(&elements_ref).await {
                Ok(Some(digest)) => digest,
                _ => continue,
            };
            if let Err(e) = pull_tree(&self.store, &client, digest).await {
                return Outcome::TransientFail(e.to_string());
            }
            if let Err(e) = self.store.set_ref(&elements_ref, digest).await {
                return Outcome::Failed(e.to_string());
            }
            return Outcome::Success;
        }

        Outcome::Failed(format!("'{}' was not found locally or on any remote", element.name))
    }
}

async fn push_tree(store: &Store, client: &RemoteStore, root: Digest) -> cas_remote::Result<()> {
    let mut digests = vec![root];
    collect_tree_digests(store, root, &mut digests)
        .await
        .map_err(|e| cas_remote::RemoteError::Other(e.to_string()))?;

    let missing = client.find_missing(digests).await?;
    for digest in missing {
        let bytes = store
            .read_blob_bytes(digest)
            .await
            .map_err(|e| cas_remote::RemoteError::Other(e.to_string()))?;
        client.store_bytes(digest, bytes::Bytes::from(bytes)).await?;
    }
    Ok(())
}

/// `stack` entries are `(digest, is_directory)`: only directory blobs get decoded and walked for
/// children, so a file blob that happens to parse as a `Directory` protobuf can never be mistaken
/// for one.
async fn pull_tree(store: &Store, client: &RemoteStore, root: Digest) -> cas_remote::Result<()> {
    let mut stack = vec![(root, true)];
    while let Some((digest, is_directory)) = stack.pop() {
        let bytes = if store.contains(digest).await {
            store
                .read_blob_bytes(digest)
                .await
                .map_err(|e| cas_remote::RemoteError::Other(e.to_string()))?
        } else {
            let bytes = client
                .load_bytes(digest)
                .await?
                .ok_or(cas_remote::RemoteError::NotFound(digest))?;
            store
                .add_blob(&bytes)
                .await
                .map_err(|e| cas_remote::RemoteError::Other(e.to_string()))?;
            bytes.to_vec()
        };
        if !is_directory {
            continue;
        }
        let entries = cas::decode_directory(&bytes).map_err(cas_remote::RemoteError::Other)?;
        for entry in entries {
            match entry {
                cas::TreeEntry::Directory { digest, .. } => stack.push((digest, true)),
                cas::TreeEntry::File { digest, .. } => stack.push((digest, false)),
                cas::TreeEntry::Symlink { .. } => {}
            }
        }
    }
    Ok(())
}

fn collect_tree_digests<'a>(
    store: &'a Store,
    digest: Digest,
    out: &'a mut Vec<Digest>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = cas::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        for entry in store.read_tree(digest).await? {
            match entry {
                cas::TreeEntry::Directory { digest, .. } => {
                    out.push(digest);
                    collect_tree_digests(store, digest, out).await?;
                }
                cas::TreeEntry::File { digest, .. } => out.push(digest),
                cas::TreeEntry::Symlink { .. } => {}
            }
        }
        Ok(())
    })
}
