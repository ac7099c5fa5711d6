// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use hashing::Digest;

#[derive(Debug, thiserror::Error)]
pub enum CasError {
    #[error("object not found for digest {0}")]
    NotFound(Digest),

    #[error("reference not found: {0}")]
    RefNotFound(String),

    #[error("object {digest} is corrupt: expected size {expected_size}, read {actual_size} bytes")]
    CorruptObject {
        digest: Digest,
        expected_size: usize,
        actual_size: usize,
    },

    #[error("blob of {size} bytes exceeds the total capacity of the CAS directory")]
    ArtifactTooLarge { size: usize },

    #[error("{message}")]
    Transient { message: String, source: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CasError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CasError::Transient { .. })
    }
}

pub type Result<T> = std::result::Result<T, CasError>;
