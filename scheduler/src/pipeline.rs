// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! The three-queue pipeline of spec §4.7: fetch, build, push. Each stage is driven by a
//! caller-supplied `StageJob` so the scheduler itself never has to know how to instantiate a
//! plugin, run a sandbox, or talk to a remote — only how to admit, bound, retry, and report.
use std::collections::HashMap;
use std::sync::Arc;

use context::{Config, Context, OnErrorPolicy};
use loader::{ElementId, Graph};

use crate::control::{Control, ControlWatch};
use crate::job::{Outcome, StageJob};
use crate::queue::{run_stage, RunState};

pub struct PipelineResult {
    pub fetch: HashMap<ElementId, RunState>,
    pub build: HashMap<ElementId, RunState>,
    pub push: HashMap<ElementId, RunState>,
}

impl PipelineResult {
    pub fn failed(&self) -> Vec<ElementId> {
        self.build
            .iter()
            .chain(self.fetch.iter())
            .chain(self.push.iter())
            .filter(|(_, state)| **state == RunState::Failed)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Drives `targets` (and, transitively, their dependencies — the caller is expected to have
/// already expanded `targets` to the full closure via `Graph::dependencies`) through fetch,
/// build, and push, honoring `context.config`'s queue sizes and `sched.on-error` policy.
pub struct Scheduler {
    graph: Arc<Graph>,
    control: Control,
}

impl Scheduler {
    pub fn new(graph: Arc<Graph>) -> (Scheduler, ControlWatch) {
        let (control, watch) = Control::new();
        (Scheduler { graph, control }, watch)
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub async fn run(
        &self,
        context: &Context,
        targets: Vec<ElementId>,
        control_watch: ControlWatch,
        fetch_job: Arc<dyn StageJob>,
        build_job: Arc<dyn StageJob>,
        push_job: Arc<dyn StageJob>,
    ) -> PipelineResult {
        let config: &Config = &context.config;

        let fetch = run_stage(
            self.graph.clone(),
            targets.clone(),
            config.fetchers,
            config.network_retries,
            false,
            fetch_job,
            control_watch.clone_receiver(),
            context.bus.clone(),
            "fetch",
        )
        .await;

        if self.should_stop_after(&fetch, config.on_error) {
            return PipelineResult {
                fetch,
                build: HashMap::new(),
                push: HashMap::new(),
            };
        }

        let build = run_stage(
            self.graph.clone(),
            targets.clone(),
            config.builders,
            config.network_retries,
            true,
            build_job,
            control_watch.clone_receiver(),
            context.bus.clone(),
            "build",
        )
        .await;

        if self.should_stop_after(&build, config.on_error) {
            return PipelineResult {
                fetch,
                build,
                push: HashMap::new(),
            };
        }

        let pushable: Vec<ElementId> = targets
            .into_iter()
            .filter(|id| build.get(id) == Some(&RunState::Success))
            .collect();

        let push = run_stage(
            self.graph.clone(),
            pushable,
            config.pushers,
            config.network_retries,
            true,
            push_job,
            control_watch,
            context.bus.clone(),
            "push",
        )
        .await;

        PipelineResult { fetch, build, push }
    }

    /// `quit`/`terminate` stop dispatching further stages once any element in the stage just
    /// run has failed; `continue` lets independent elements proceed regardless;
    /// `interactive` behaves like `continue` here (the prompt itself is a frontend concern,
    /// driven off the `Fail` messages already on the bus).
    fn should_stop_after(&self, states: &HashMap<ElementId, RunState>, policy: OnErrorPolicy) -> bool {
        let any_failed = states.values().any(|s| *s == RunState::Failed);
        any_failed && matches!(policy, OnErrorPolicy::Quit | OnErrorPolicy::Terminate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loader::{Element, Provenance, Variables};

    fn element(graph: &mut Graph, name: &str) -> ElementId {
        let value: serde_yaml::Value = serde_yaml::from_str("kind: manual\n").unwrap();
        let el = Element::parse(name, &value, Provenance::new(name), &Variables::default()).unwrap();
        graph.get_or_insert(name, el)
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl StageJob for AlwaysSucceeds {
        async fn run(&self, _element: &Element) -> Outcome {
            Outcome::Success
        }
    }

    struct FailsOnBuild;

    #[async_trait]
    impl StageJob for FailsOnBuild {
        async fn run(&self, _element: &Element) -> Outcome {
            Outcome::Failed("build broke".to_string())
        }
    }

    async fn test_context(cache_dir: &std::path::Path, on_error: OnErrorPolicy) -> Context {
        let mut config = Config::defaults();
        config.cache_dir = cache_dir.to_path_buf();
        config.on_error = on_error;
        let (context, _rx) = Context::new(config).await.unwrap();
        context
    }

    #[tokio::test]
    async fn a_failed_build_skips_push_under_quit_policy() {
        let dir = tempfile::tempdir().unwrap();
        let context = test_context(dir.path(), OnErrorPolicy::Quit).await;

        let mut graph = Graph::new();
        let a = element(&mut graph, "a.bst");
        let (scheduler, watch) = Scheduler::new(Arc::new(graph));

        let result = scheduler
            .run(
                &context,
                vec![a],
                watch,
                Arc::new(AlwaysSucceeds),
                Arc::new(FailsOnBuild),
                Arc::new(AlwaysSucceeds),
            )
            .await;

        assert_eq!(result.build.get(&a), Some(&RunState::Failed));
        assert!(result.push.is_empty());
        assert_eq!(result.failed(), vec![a]);
    }

    #[tokio::test]
    async fn a_clean_run_reaches_push() {
        let dir = tempfile::tempdir().unwrap();
        let context = test_context(dir.path(), OnErrorPolicy::Continue).await;

        let mut graph = Graph::new();
        let a = element(&mut graph, "a.bst");
        let (scheduler, watch) = Scheduler::new(Arc::new(graph));

        let result = scheduler
            .run(
                &context,
                vec![a],
                watch,
                Arc::new(AlwaysSucceeds),
                Arc::new(AlwaysSucceeds),
                Arc::new(AlwaysSucceeds),
            )
            .await;

        assert_eq!(result.push.get(&a), Some(&RunState::Success));
        assert!(result.failed().is_empty());
    }
}
