// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! A single queue: bounded concurrency (`tokio::sync::Semaphore`, grounded on
//! `process_execution::bounded::AsyncSemaphore`'s use of a semaphore to cap in-flight work),
//! dependency-respecting admission, and retry-with-backoff for transient failures.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use context::{Message, MessageBus, MessageKind};
use loader::{ElementId, Graph};
use tokio::sync::{Notify, Semaphore};

use crate::control::{wait_for_cancel, ControlState, ControlWatch};
use crate::job::{Outcome, StageJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Queued,
    Running,
    Success,
    Failed,
    TransientFail,
}

struct Shared {
    states: Mutex<HashMap<ElementId, RunState>>,
    notify: Notify,
}

impl Shared {
    fn set(&self, id: ElementId, state: RunState) {
        self.states.lock().unwrap().insert(id, state);
        self.notify.notify_waiters();
    }

    fn get(&self, id: ElementId) -> Option<RunState> {
        self.states.lock().unwrap().get(&id).copied()
    }
}

/// Runs `job` over every element in `targets`, respecting `concurrency` workers at a time.
/// When `requires_predecessors` is set, an element only starts once every dependency that is
/// also in `targets` has reached `Success` in this same stage; any predecessor reaching `Failed`
/// propagates failure without running the dependent at all.
#[allow(clippy::too_many_arguments)]
pub async fn run_stage(
    graph: Arc<Graph>,
    targets: Vec<ElementId>,
    concurrency: usize,
    network_retries: u32,
    requires_predecessors: bool,
    job: Arc<dyn StageJob>,
    control: ControlWatch,
    bus: MessageBus,
    stage_name: &str,
) -> HashMap<ElementId, RunState> {
    let target_set: std::collections::HashSet<ElementId> = targets.iter().copied().collect();
    let shared = Arc::new(Shared {
        states: Mutex::new(targets.iter().map(|&id| (id, RunState::Queued)).collect()),
        notify: Notify::new(),
    });
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    let mut handles = Vec::with_capacity(targets.len());
    for id in targets.iter().copied() {
        let graph = graph.clone();
        let shared = shared.clone();
        let semaphore = semaphore.clone();
        let job = job.clone();
        let mut control = control.clone_receiver();
        let bus = bus.clone();
        let stage_name = stage_name.to_string();
        let target_set = target_set.clone();

        handles.push(tokio::spawn(async move {
            if requires_predecessors {
                loop {
                    let deps: Vec<ElementId> = graph
                        .dependencies(id)
                        .filter(|d| target_set.contains(d))
                        .collect();
                    let mut all_done = true;
                    let mut any_failed = false;
                    for dep in &deps {
                        match shared.get(*dep) {
                            Some(RunState::Success) => {}
                            Some(RunState::Failed) => any_failed = true,
                            _ => all_done = false,
                        }
                    }
                    if any_failed {
                        shared.set(id, RunState::Failed);
                        return;
                    }
                    if all_done {
                        break;
                    }
                    shared.notify.notified().await;
                }
            }

            control.wait_while_suspended().await;
            if control.state() == ControlState::Cancelled {
                shared.set(id, RunState::Failed);
                return;
            }

            let mut attempt = 0u32;
            loop {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                shared.set(id, RunState::Running);
                let name = graph.element(id).name.clone();
                bus.send(
                    Message::new(MessageKind::Start, stage_name.clone(), format!("{stage_name} {name}"))
                        .for_element(name.clone()),
                );

                let outcome = tokio::select! {
                    outcome = job.run(graph.element(id)) => outcome,
                    _ = wait_for_cancel(&mut control) => {
                        shared.set(id, RunState::Failed);
                        bus.send(
                            Message::new(MessageKind::Fail, stage_name.clone(), "cancelled".to_string())
                                .for_element(name),
                        );
                        return;
                    }
                };
                match outcome {
                    Outcome::Success => {
                        shared.set(id, RunState::Success);
                        bus.send(
                            Message::new(MessageKind::Success, stage_name.clone(), format!("{stage_name} {name} done"))
                                .for_element(name),
                        );
                        return;
                    }
                    Outcome::Failed(reason) => {
                        shared.set(id, RunState::Failed);
                        bus.send(
                            Message::new(MessageKind::Fail, stage_name.clone(), reason)
                                .for_element(name),
                        );
                        return;
                    }
                    Outcome::TransientFail(reason) => {
                        attempt += 1;
                        if attempt > network_retries {
                            shared.set(id, RunState::Failed);
                            bus.send(
                                Message::new(
                                    MessageKind::Fail,
                                    stage_name.clone(),
                                    format!("{reason} (giving up after {attempt} attempts)"),
                                )
                                .for_element(name),
                            );
                            return;
                        }
                        shared.set(id, RunState::TransientFail);
                        bus.send(
                            Message::new(
                                MessageKind::Warn,
                                stage_name.clone(),
                                format!("{reason} (retry {attempt}/{network_retries})"),
                            )
                            .for_element(name),
                        );
                        let backoff = Duration::from_millis(200 * 2u64.pow(attempt.min(8)));
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    Arc::try_unwrap(shared)
        .map(|s| s.states.into_inner().unwrap())
        .unwrap_or_else(|s| s.states.lock().unwrap().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loader::{DependencyType, Element, Provenance};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn element(graph: &mut Graph, name: &str) -> ElementId {
        let value: serde_yaml::Value = serde_yaml::from_str("kind: manual\n").unwrap();
        let el = Element::parse(name, &value, Provenance::new(name), &loader::Variables::default()).unwrap();
        graph.get_or_insert(name, el)
    }

    struct AlwaysSucceeds {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StageJob for AlwaysSucceeds {
        async fn run(&self, _element: &Element) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Outcome::Success
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl StageJob for AlwaysFails {
        async fn run(&self, _element: &Element) -> Outcome {
            Outcome::Failed("boom".to_string())
        }
    }

    struct TransientThenSucceeds {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StageJob for TransientThenSucceeds {
        async fn run(&self, _element: &Element) -> Outcome {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                Outcome::TransientFail("flaky network".to_string())
            } else {
                Outcome::Success
            }
        }
    }

    #[tokio::test]
    async fn runs_every_target_when_independent() {
        let mut graph = Graph::new();
        let a = element(&mut graph, "a.bst");
        let b = element(&mut graph, "b.bst");
        let calls = Arc::new(AtomicUsize::new(0));
        let (_control, watch) = crate::control::Control::new();
        let (bus, _rx) = context::MessageBus::channel();

        let states = run_stage(
            Arc::new(graph),
            vec![a, b],
            2,
            0,
            false,
            Arc::new(AlwaysSucceeds { calls: calls.clone() }),
            watch,
            bus,
            "fetch",
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(states.get(&a), Some(&RunState::Success));
        assert_eq!(states.get(&b), Some(&RunState::Success));
    }

    #[tokio::test]
    async fn a_failed_predecessor_blocks_its_dependent_without_running_it() {
        let mut graph = Graph::new();
        let a = element(&mut graph, "a.bst");
        let b = element(&mut graph, "b.bst");
        graph.add_dependency(b, a, DependencyType::All);
        let (_control, watch) = crate::control::Control::new();
        let (bus, _rx) = context::MessageBus::channel();

        let job: Arc<dyn StageJob> = Arc::new(AlwaysFails);
        let states = run_stage(Arc::new(graph), vec![a, b], 2, 0, true, job, watch, bus, "build").await;

        assert_eq!(states.get(&a), Some(&RunState::Failed));
        assert_eq!(states.get(&b), Some(&RunState::Failed));
    }

    #[tokio::test]
    async fn transient_failure_retries_until_the_cap_then_succeeds() {
        let mut graph = Graph::new();
        let a = element(&mut graph, "a.bst");
        let (_control, watch) = crate::control::Control::new();
        let (bus, _rx) = context::MessageBus::channel();

        let job: Arc<dyn StageJob> = Arc::new(TransientThenSucceeds {
            attempts: Arc::new(AtomicUsize::new(0)),
        });
        let states = run_stage(Arc::new(graph), vec![a], 1, 2, false, job, watch, bus, "fetch").await;

        assert_eq!(states.get(&a), Some(&RunState::Success));
    }
}
