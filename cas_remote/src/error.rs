// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use hashing::Digest;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("digest not found on remote: {0}")]
    NotFound(Digest),

    #[error("size or digest mismatch: {0}")]
    FailedPrecondition(String),

    #[error("remote is over quota")]
    ResourceExhausted,

    #[error("remote does not permit this operation: {0}")]
    PermissionDenied(String),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("{0}")]
    Other(String),
}

impl From<String> for RemoteError {
    fn from(message: String) -> Self {
        RemoteError::Other(message)
    }
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Grpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable
                    | tonic::Code::DeadlineExceeded
                    | tonic::Code::Aborted
                    | tonic::Code::Internal
            ),
            RemoteError::ResourceExhausted => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
