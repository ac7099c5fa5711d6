// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("element '{0}' failed")]
    ElementFailed(String),

    #[error("build aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
