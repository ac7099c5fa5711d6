// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! What a queue actually does to an element is supplied by the caller, the same way
//! `loader::JunctionResolver` keeps junction staging out of the loader: the scheduler drives
//! admission, concurrency, retry, and failure policy, but never instantiates a plugin itself.
use async_trait::async_trait;
use loader::Element;

/// The result of running one element through one queue.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success,
    Failed(String),
    /// A retryable failure (e.g. a network error during fetch or push).
    TransientFail(String),
}

/// One queue's operation on a single element: `fetch()` for the Fetch queue, the full §4.6
/// assembly for the Build queue, upload-and-close-over-blobs for the Push queue.
#[async_trait]
pub trait StageJob: Send + Sync {
    async fn run(&self, element: &Element) -> Outcome;
}
