// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! The eight subcommand handlers of the CLI surface: each bootstraps a `Context`/`Loader`, drives
//! the scheduler or CAS directly, and drains the message bus to the log while doing it.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use context::{drain, Context, Message, MessageKind};
use loader::{ElementId, Graph};
use plugin::Element as _;
use plugin::Sandbox as _;
use sandbox::LocalSandbox;
use scheduler::{PipelineResult, Scheduler, StageJob};

use crate::error::{CliError, Result};
use crate::jobs::{new_ledger, BuildJob, FetchJob, PullJob, PushJob, TrackJob};
use crate::project::{bootstrap_context, bootstrap_loader, parse_overrides, NoJunctions};
use crate::sources::build_source;

fn report_message(message: &Message) {
    let prefix = message
        .element_id
        .as_deref()
        .map(|id| format!("[{id}] "))
        .unwrap_or_default();
    match message.kind {
        MessageKind::Fail | MessageKind::Bug => log::error!("{prefix}{}", message.text),
        MessageKind::Warn => log::warn!("{prefix}{}", message.text),
        MessageKind::Status | MessageKind::Info | MessageKind::Start | MessageKind::Success => {
            log::info!("{prefix}{}", message.text)
        }
    }
}

fn sandbox_base(context: &Context) -> PathBuf {
    context.config.cache_dir.join("sandboxes")
}

/// Every element reachable from `roots`, in the graph's stable dependency order.
fn expand_closure(graph: &Graph, roots: &[ElementId]) -> Vec<ElementId> {
    let mut seen = std::collections::HashSet::new();
    let mut stack: Vec<ElementId> = roots.to_vec();
    let mut all = Vec::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        all.push(id);
        stack.extend(graph.dependencies(id));
    }
    graph.stable_order(all)
}

struct Bootstrapped {
    context: Context,
    graph: Graph,
    project_dir: PathBuf,
    project: loader::Project,
    targets: Vec<ElementId>,
    closure: Vec<ElementId>,
    log_task: tokio::task::JoinHandle<()>,
}

async fn bootstrap(directory: &Option<PathBuf>, option: &[String], targets: &[String]) -> Result<Bootstrapped> {
    let start = directory.clone().unwrap_or_else(|| PathBuf::from("."));
    let project_dir = loader::locate_project_root(&start)?;
    let overrides = parse_overrides(option)?;
    let (context, receiver) = bootstrap_context(&project_dir, &overrides).await?;
    let log_task = tokio::spawn(drain(receiver, |message| report_message(&message)));

    let resolver = NoJunctions;
    let mut loader = bootstrap_loader(&project_dir, &resolver)?;
    let ids = loader.load_targets(targets)?;
    let project = loader.project().clone();
    let graph = loader.into_graph();
    let closure = expand_closure(&graph, &ids);

    Ok(Bootstrapped {
        context,
        graph,
        project_dir,
        project,
        targets: ids,
        closure,
        log_task,
    })
}

async fn finish(context: Context, log_task: tokio::task::JoinHandle<()>) {
    drop(context);
    let _ = log_task.await;
}

fn exit_code(result: &PipelineResult) -> i32 {
    if result.failed().is_empty() {
        0
    } else {
        1
    }
}

pub async fn build(directory: Option<PathBuf>, option: Vec<String>, targets: Vec<String>) -> Result<i32> {
    let b = bootstrap(&directory, &option, &targets).await?;
    let graph = Arc::new(b.graph);
    let ledger = new_ledger();

    let fetch_job: Arc<dyn StageJob> = Arc::new(FetchJob {
        project_dir: b.project_dir.clone(),
    });
    let build_job: Arc<dyn StageJob> = Arc::new(BuildJob {
        store: b.context.store.clone(),
        project_dir: b.project_dir.clone(),
        sandbox_base: sandbox_base(&b.context),
        overlap_policy: b.project.fail_on_overlap,
        ledger,
    });
    let push_job: Arc<dyn StageJob> = Arc::new(PushJob {
        store: b.context.store.clone(),
        remotes: b.project.artifacts.clone(),
    });

    let (scheduler, watch) = Scheduler::new(graph);
    let result = scheduler
        .run(&b.context, b.closure.clone(), watch, fetch_job, build_job, push_job)
        .await;
    let code = exit_code(&result);
    finish(b.context, b.log_task).await;
    Ok(code)
}

pub async fn fetch(directory: Option<PathBuf>, option: Vec<String>, targets: Vec<String>) -> Result<i32> {
    let b = bootstrap(&directory, &option, &targets).await?;
    let graph = Arc::new(b.graph);
    let (_control, watch) = scheduler::Control::new();
    let job: Arc<dyn StageJob> = Arc::new(FetchJob {
        project_dir: b.project_dir.clone(),
    });
    let states = scheduler::run_stage(
        graph,
        b.closure.clone(),
        b.context.config.fetchers,
        b.context.config.network_retries,
        false,
        job,
        watch,
        b.context.bus.clone(),
        "fetch",
    )
    .await;
    let code = if states.values().any(|s| *s == scheduler::RunState::Failed) {
        1
    } else {
        0
    };
    finish(b.context, b.log_task).await;
    Ok(code)
}

pub async fn track(directory: Option<PathBuf>, option: Vec<String>, targets: Vec<String>) -> Result<i32> {
    let b = bootstrap(&directory, &option, &targets).await?;
    let graph = Arc::new(b.graph);
    let (_control, watch) = scheduler::Control::new();
    let job: Arc<dyn StageJob> = Arc::new(TrackJob {
        project_dir: b.project_dir.clone(),
        bus: b.context.bus.clone(),
    });
    let states = scheduler::run_stage(
        graph,
        b.closure.clone(),
        b.context.config.fetchers,
        b.context.config.network_retries,
        false,
        job,
        watch,
        b.context.bus.clone(),
        "track",
    )
    .await;
    let code = if states.values().any(|s| *s == scheduler::RunState::Failed) {
        1
    } else {
        0
    };
    finish(b.context, b.log_task).await;
    Ok(code)
}

pub async fn push(directory: Option<PathBuf>, option: Vec<String>, targets: Vec<String>) -> Result<i32> {
    let b = bootstrap(&directory, &option, &targets).await?;
    if b.project.artifacts.iter().all(|r| !r.push) {
        finish(b.context, b.log_task).await;
        return Err(CliError::NoArtifactRemotes);
    }
    let graph = Arc::new(b.graph);
    let (_control, watch) = scheduler::Control::new();
    let job: Arc<dyn StageJob> = Arc::new(PushJob {
        store: b.context.store.clone(),
        remotes: b.project.artifacts.clone(),
    });
    let states = scheduler::run_stage(
        graph,
        b.closure.clone(),
        b.context.config.pushers,
        b.context.config.network_retries,
        false,
        job,
        watch,
        b.context.bus.clone(),
        "push",
    )
    .await;
    let code = if states.values().any(|s| *s == scheduler::RunState::Failed) {
        1
    } else {
        0
    };
    finish(b.context, b.log_task).await;
    Ok(code)
}

pub async fn pull(directory: Option<PathBuf>, option: Vec<String>, targets: Vec<String>) -> Result<i32> {
    let b = bootstrap(&directory, &option, &targets).await?;
    if b.project.artifacts.is_empty() {
        finish(b.context, b.log_task).await;
        return Err(CliError::NoArtifactRemotes);
    }
    let graph = Arc::new(b.graph);
    let (_control, watch) = scheduler::Control::new();
    let job: Arc<dyn StageJob> = Arc::new(PullJob {
        store: b.context.store.clone(),
        remotes: b.project.artifacts.clone(),
    });
    let states = scheduler::run_stage(
        graph,
        b.closure.clone(),
        b.context.config.fetchers,
        b.context.config.network_retries,
        false,
        job,
        watch,
        b.context.bus.clone(),
        "pull",
    )
    .await;
    let code = if states.values().any(|s| *s == scheduler::RunState::Failed) {
        1
    } else {
        0
    };
    finish(b.context, b.log_task).await;
    Ok(code)
}

pub async fn show(directory: Option<PathBuf>, option: Vec<String>, targets: Vec<String>, format: String) -> Result<i32> {
    let b = bootstrap(&directory, &option, &targets).await?;

    let mut strong_keys: HashMap<String, String> = HashMap::new();
    for id in expand_closure(&b.graph, &b.closure) {
        let element = b.graph.element(id);
        let dep_keys: Vec<String> = element
            .build_dependencies()
            .filter_map(|dep| strong_keys.get(&dep.name).cloned())
            .collect();

        let mut fingerprints = Vec::new();
        for decl in &element.sources {
            let mut source = build_source(&decl.kind, &b.project_dir)?;
            source.configure(&decl.config)?;
            fingerprints.push((decl.kind.clone(), source.get_unique_key()));
        }
        let cacheable_environment = element
            .environment
            .iter()
            .filter(|(k, _)| !element.environment_nocache.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let inputs = cachekey::KeyInputs {
            kind: element.kind.clone(),
            variables: element.variables.as_map(),
            cacheable_environment,
            config: serde_json::to_value(&element.config).unwrap_or_default(),
            public: serde_json::to_value(&element.public).unwrap_or_default(),
            sandbox_config: serde_json::to_value(&element.sandbox).unwrap_or_default(),
            source_fingerprints: fingerprints,
        };
        strong_keys.insert(element.name.clone(), cachekey::strong_key(&inputs, &dep_keys));
    }

    let rows: Vec<_> = b
        .targets
        .iter()
        .map(|&id| {
            let element = b.graph.element(id);
            (element.name.clone(), element.kind.clone(), strong_keys.get(&element.name).cloned().unwrap_or_default())
        })
        .collect();

    match format.as_str() {
        "json" => {
            let json: Vec<_> = rows
                .iter()
                .map(|(name, kind, key)| serde_json::json!({"name": name, "kind": kind, "key": key}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        }
        _ => {
            for (name, kind, key) in &rows {
                println!("{name} {kind} {key}");
            }
        }
    }

    finish(b.context, b.log_task).await;
    Ok(0)
}

pub async fn checkout(directory: Option<PathBuf>, option: Vec<String>, element: String, destination: PathBuf) -> Result<i32> {
    let b = bootstrap(&directory, &option, &[element.clone()]).await?;
    let digest = b
        .context
        .store
        .resolve_ref(&format!("elements/{element}"))
        .await
        .map_err(|_| CliError::UnknownElement(element.clone()))?;
    sandbox::stage_tree_into(&b.context.store, digest, &destination).await?;
    finish(b.context, b.log_task).await;
    Ok(0)
}

pub async fn shell(directory: Option<PathBuf>, option: Vec<String>, element: String) -> Result<i32> {
    let b = bootstrap(&directory, &option, &[element.clone()]).await?;
    let id = *b
        .targets
        .first()
        .ok_or_else(|| CliError::UnknownElement(element.clone()))?;
    let el = b.graph.element(id).clone();

    let mut sandbox = LocalSandbox::new(&sandbox_base(&b.context))?;
    let mut build_element = plugin::BuildElement::new();
    build_element.configure(&el.config)?;
    build_element.set_environment(el.environment.clone());
    build_element.configure_sandbox(&mut sandbox)?;

    for dep in el.build_dependencies() {
        let digest = b
            .context
            .store
            .resolve_ref(&format!("elements/{}", dep.name))
            .await
            .map_err(|_| CliError::UnknownElement(dep.name.clone()))?;
        sandbox::stage_tree_into(&b.context.store, digest, sandbox.host_root()).await?;
    }

    let sources_dir = sandbox.host_root().join(plugin::BUILD_ROOT.trim_start_matches('/'));
    std::fs::create_dir_all(&sources_dir)?;
    for decl in &el.sources {
        let mut source = build_source(&decl.kind, &b.project_dir)?;
        source.configure(&decl.config)?;
        source.stage(&sources_dir)?;
    }

    let exit_code = sandbox.run(
        &b.project.shell_command,
        plugin::RunFlags::default(),
        Some(plugin::BUILD_ROOT),
        &el.environment,
    )?;

    finish(b.context, b.log_task).await;
    Ok(exit_code)
}
