// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::future::Future;
use std::time::Duration;

use crate::error::RemoteError;

/// Retries `f` up to `attempts` times (the first call plus `attempts - 1` retries), backing off
/// exponentially between attempts, as long as the error it returns is retryable.
pub async fn retry_call<F, Fut, T>(attempts: usize, mut f: F) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let attempts = attempts.max(1);
    for attempt in 0..attempts {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(attempt as u32))).await;
            }
            Err(err) => return Err(err),
        }
    }
    unreachable!("the loop above always returns on its last iteration")
}
