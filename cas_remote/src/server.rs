// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::pin::Pin;

use bytes::Bytes;
use cas::CasError;
use futures::Stream;
use hashing::{Digest, Fingerprint};
use tonic::{Request, Response, Status, Streaming};

use protos::gen::{
    batch_read_blobs_response, batch_update_blobs_response, BatchReadBlobsRequest,
    BatchReadBlobsResponse, BatchUpdateBlobsRequest, BatchUpdateBlobsResponse, BlobStatus,
    CacheCapabilities, FindMissingBlobsRequest, FindMissingBlobsResponse, GetCapabilitiesRequest,
    GetReferenceRequest, GetReferenceResponse, ReadRequest, ReadResponse, ServerCapabilities,
    StatusRequest, StatusResponse, UpdateReferenceRequest, UpdateReferenceResponse, WriteRequest,
    WriteResponse,
};

const MAX_READ_CHUNK_BYTES: usize = 1024 * 1024;

/// Backs the CAS/ByteStream/Capabilities/ReferenceStorage services with a local [`cas::Store`].
/// This is the server half of the wire protocol the client in [`crate::client`] speaks; a
/// daemonized CAS (§6's `casd.sock`) or a shared network cache are both this server with
/// different transport bindings.
#[derive(Clone)]
pub struct CasServer {
    store: cas::Store,
    max_batch_total_size_bytes: i64,
    allow_updates: bool,
}

impl CasServer {
    pub fn new(store: cas::Store, max_batch_total_size_bytes: i64, allow_updates: bool) -> Self {
        CasServer {
            store,
            max_batch_total_size_bytes,
            allow_updates,
        }
    }
}

#[tonic::async_trait]
impl protos::gen::capabilities_server::Capabilities for CasServer {
    async fn get_capabilities(
        &self,
        _request: Request<GetCapabilitiesRequest>,
    ) -> Result<Response<ServerCapabilities>, Status> {
        Ok(Response::new(ServerCapabilities {
            cache_capabilities: Some(CacheCapabilities {
                max_batch_total_size_bytes: self.max_batch_total_size_bytes,
                digest_function: "SHA256".to_string(),
            }),
        }))
    }
}

#[tonic::async_trait]
impl protos::gen::content_addressable_storage_server::ContentAddressableStorage for CasServer {
    async fn find_missing_blobs(
        &self,
        request: Request<FindMissingBlobsRequest>,
    ) -> Result<Response<FindMissingBlobsResponse>, Status> {
        let request = request.into_inner();
        let mut missing = Vec::new();
        for digest_pb in request.blob_digests {
            let digest =
                protos::require_digest(&digest_pb).map_err(Status::invalid_argument)?;
            if !self.store.contains(digest).await {
                missing.push(digest_pb);
            }
        }
        Ok(Response::new(FindMissingBlobsResponse {
            missing_blob_digests: missing,
        }))
    }

    async fn batch_read_blobs(
        &self,
        request: Request<BatchReadBlobsRequest>,
    ) -> Result<Response<BatchReadBlobsResponse>, Status> {
        let request = request.into_inner();
        let mut responses = Vec::with_capacity(request.digests.len());
        for digest_pb in request.digests {
            let digest =
                protos::require_digest(&digest_pb).map_err(Status::invalid_argument)?;
            let (data, status) = match self.store.read_blob_bytes(digest).await {
                Ok(bytes) => (Bytes::from(bytes), ok_status()),
                Err(CasError::NotFound(_)) => (Bytes::new(), not_found_status()),
                Err(err) => return Err(Status::internal(err.to_string())),
            };
            responses.push(batch_read_blobs_response::Response {
                digest: Some(digest_pb),
                data,
                status: Some(status),
            });
        }
        Ok(Response::new(BatchReadBlobsResponse { responses }))
    }

    async fn batch_update_blobs(
        &self,
        request: Request<BatchUpdateBlobsRequest>,
    ) -> Result<Response<BatchUpdateBlobsResponse>, Status> {
        if !self.allow_updates {
            return Err(Status::permission_denied("push is disabled on this remote"));
        }
        let request = request.into_inner();
        let mut responses = Vec::with_capacity(request.requests.len());
        for entry in request.requests {
            let digest_pb = entry
                .digest
                .ok_or_else(|| Status::invalid_argument("blob request missing a digest"))?;
            let expected = protos::require_digest(&digest_pb).map_err(Status::invalid_argument)?;
            let actual = Digest::of_bytes(&entry.data);
            let status = if actual == expected {
                self.store
                    .add_blob(&entry.data)
                    .await
                    .map_err(|e| Status::internal(e.to_string()))?;
                ok_status()
            } else {
                BlobStatus {
                    code: 3,
                    message: format!("digest mismatch: expected {expected}, computed {actual}"),
                }
            };
            responses.push(batch_update_blobs_response::Response {
                digest: Some(digest_pb),
                status: Some(status),
            });
        }
        Ok(Response::new(BatchUpdateBlobsResponse { responses }))
    }
}

type ReadResponseStream = Pin<Box<dyn Stream<Item = Result<ReadResponse, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl protos::gen::byte_stream_server::ByteStream for CasServer {
    type ReadStream = ReadResponseStream;

    async fn read(
        &self,
        request: Request<ReadRequest>,
    ) -> Result<Response<Self::ReadStream>, Status> {
        let request = request.into_inner();
        let digest =
            parse_blob_resource_name(&request.resource_name).map_err(Status::invalid_argument)?;
        let bytes = self.store.read_blob_bytes(digest).await.map_err(|e| match e {
            CasError::NotFound(_) => Status::not_found("blob not found"),
            err => Status::internal(err.to_string()),
        })?;

        let offset = request.read_offset.max(0) as usize;
        let limit = if request.read_limit > 0 {
            request.read_limit as usize
        } else {
            bytes.len()
        };
        let end = bytes.len().min(offset.saturating_add(limit));
        let slice = bytes.get(offset..end).unwrap_or(&[]).to_vec();

        let chunks: Vec<Result<ReadResponse, Status>> = slice
            .chunks(MAX_READ_CHUNK_BYTES)
            .map(|chunk| Ok(ReadResponse { data: Bytes::copy_from_slice(chunk) }))
            .collect();
        Ok(Response::new(Box::pin(tokio_stream::iter(chunks))))
    }

    async fn write(
        &self,
        request: Request<Streaming<WriteRequest>>,
    ) -> Result<Response<WriteResponse>, Status> {
        let mut stream = request.into_inner();
        let mut buf = Vec::new();
        let mut expected_digest = None;
        let mut finished = false;

        while let Some(chunk) = stream.message().await? {
            if expected_digest.is_none() {
                expected_digest = Some(
                    parse_blob_resource_name(&chunk.resource_name)
                        .map_err(Status::invalid_argument)?,
                );
            }
            buf.extend_from_slice(&chunk.data);
            if chunk.finish_write {
                finished = true;
                break;
            }
        }

        // A client that disconnects (or omits finish_write entirely) must not leave a partial
        // object visible; there is nothing to roll back here because nothing was ever admitted.
        if !finished {
            return Err(Status::failed_precondition(
                "write stream ended before a chunk with finish_write=true",
            ));
        }

        let expected =
            expected_digest.ok_or_else(|| Status::invalid_argument("empty write stream"))?;
        let actual = Digest::of_bytes(&buf);
        if actual != expected {
            return Err(Status::failed_precondition(format!(
                "digest mismatch: expected {expected}, computed {actual}"
            )));
        }
        if !self.allow_updates {
            return Err(Status::permission_denied("push is disabled on this remote"));
        }

        self.store
            .add_blob(&buf)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(WriteResponse {
            committed_size: buf.len() as i64,
        }))
    }
}

#[tonic::async_trait]
impl protos::gen::reference_storage_server::ReferenceStorage for CasServer {
    async fn get_reference(
        &self,
        request: Request<GetReferenceRequest>,
    ) -> Result<Response<GetReferenceResponse>, Status> {
        let request = request.into_inner();
        match self.store.resolve_ref(&request.key).await {
            Ok(digest) => Ok(Response::new(GetReferenceResponse {
                digest: Some((&digest).into()),
            })),
            Err(CasError::RefNotFound(_)) => {
                Err(Status::not_found(format!("no reference {}", request.key)))
            }
            Err(err) => Err(Status::internal(err.to_string())),
        }
    }

    async fn update_reference(
        &self,
        request: Request<UpdateReferenceRequest>,
    ) -> Result<Response<UpdateReferenceResponse>, Status> {
        if !self.allow_updates {
            return Err(Status::permission_denied("push is disabled on this remote"));
        }
        let request = request.into_inner();
        let digest = protos::require_digest(request.digest.as_ref()).map_err(Status::invalid_argument)?;
        self.store
            .set_ref(&request.key, digest)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(UpdateReferenceResponse {}))
    }

    async fn status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        Ok(Response::new(StatusResponse {
            allow_updates: self.allow_updates,
        }))
    }
}

fn ok_status() -> BlobStatus {
    BlobStatus {
        code: 0,
        message: String::new(),
    }
}

fn not_found_status() -> BlobStatus {
    BlobStatus {
        code: 1,
        message: "not found".to_string(),
    }
}

/// Extracts the digest out of a `blobs/<hash>/<size>` or `uploads/<uuid>/blobs/<hash>/<size>`
/// resource name, with an optional instance-name prefix before either form.
fn parse_blob_resource_name(name: &str) -> Result<Digest, String> {
    let idx = name
        .find("blobs/")
        .ok_or_else(|| format!("not a blob resource name: {name:?}"))?;
    let rest = &name[idx + "blobs/".len()..];
    let mut parts = rest.splitn(2, '/');
    let hash = parts
        .next()
        .ok_or_else(|| format!("malformed resource name: {name:?}"))?;
    let size = parts
        .next()
        .ok_or_else(|| format!("malformed resource name: {name:?}"))?;
    let size_bytes: usize = size
        .parse()
        .map_err(|_| format!("malformed size in resource name: {name:?}"))?;
    let fingerprint = Fingerprint::from_hex_string(hash)?;
    Ok(Digest::new(fingerprint, size_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_blob_resource_name() {
        let digest = Digest::of_bytes(b"hi");
        let name = format!("blobs/{}/{}", digest.hash, digest.size_bytes);
        assert_eq!(parse_blob_resource_name(&name).unwrap(), digest);
    }

    #[test]
    fn parses_upload_resource_name() {
        let digest = Digest::of_bytes(b"hi");
        let name = format!(
            "uploads/3b9f1f0a-0000-0000-0000-000000000000/blobs/{}/{}",
            digest.hash, digest.size_bytes
        );
        assert_eq!(parse_blob_resource_name(&name).unwrap(), digest);
    }
}
