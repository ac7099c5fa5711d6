// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::cmp::min;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use hashing::Digest;
use tokio::sync::OnceCell;
use tonic::transport::Channel;

use protos::gen::byte_stream_client::ByteStreamClient;
use protos::gen::capabilities_client::CapabilitiesClient;
use protos::gen::content_addressable_storage_client::ContentAddressableStorageClient;
use protos::gen::reference_storage_client::ReferenceStorageClient;
use protos::gen::{
    BatchReadBlobsRequest, BatchUpdateBlobsRequest, BlobStatus, FindMissingBlobsRequest,
    GetCapabilitiesRequest, GetReferenceRequest, ReadRequest, ServerCapabilities, StatusRequest,
    UpdateReferenceRequest, WriteRequest,
};

use crate::error::{RemoteError, Result};
use crate::retry::retry_call;

const DEFAULT_CHUNK_SIZE_BYTES: usize = 1024 * 1024;
const DEFAULT_BATCH_SIZE_LIMIT: usize = 1024 * 1024;
const RPC_ATTEMPTS: usize = 3;

/// A client for one remote, speaking the CAS/ByteStream/Capabilities/ReferenceStorage protocol.
#[derive(Clone)]
pub struct RemoteStore {
    instance_name: Option<String>,
    chunk_size_bytes: usize,
    batch_api_size_limit: usize,
    capabilities_client: CapabilitiesClient<Channel>,
    cas_client: ContentAddressableStorageClient<Channel>,
    byte_stream_client: ByteStreamClient<Channel>,
    reference_client: ReferenceStorageClient<Channel>,
    capabilities_cell: Arc<OnceCell<ServerCapabilities>>,
}

impl RemoteStore {
    pub async fn connect(address: &str, instance_name: Option<String>) -> Result<RemoteStore> {
        let channel = Channel::from_shared(address.to_string())
            .map_err(|e| RemoteError::Other(e.to_string()))?
            .connect()
            .await?;
        Ok(RemoteStore {
            instance_name,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            batch_api_size_limit: DEFAULT_BATCH_SIZE_LIMIT,
            capabilities_client: CapabilitiesClient::new(channel.clone()),
            cas_client: ContentAddressableStorageClient::new(channel.clone()),
            byte_stream_client: ByteStreamClient::new(channel.clone()),
            reference_client: ReferenceStorageClient::new(channel),
            capabilities_cell: Arc::new(OnceCell::new()),
        })
    }

    fn instance_name(&self) -> String {
        self.instance_name.clone().unwrap_or_default()
    }

    fn blob_resource_name(&self, digest: Digest) -> String {
        match &self.instance_name {
            Some(name) if !name.is_empty() => {
                format!("{name}/blobs/{}/{}", digest.hash, digest.size_bytes)
            }
            _ => format!("blobs/{}/{}", digest.hash, digest.size_bytes),
        }
    }

    fn upload_resource_name(&self, digest: Digest) -> String {
        let uuid = uuid::Uuid::new_v4();
        match &self.instance_name {
            Some(name) if !name.is_empty() => format!(
                "{name}/uploads/{uuid}/blobs/{}/{}",
                digest.hash, digest.size_bytes
            ),
            _ => format!("uploads/{uuid}/blobs/{}/{}", digest.hash, digest.size_bytes),
        }
    }

    async fn get_capabilities(&self) -> Result<ServerCapabilities> {
        let capabilities = self
            .capabilities_cell
            .get_or_try_init(|| async {
                let request = GetCapabilitiesRequest {
                    instance_name: self.instance_name(),
                };
                let mut client = self.capabilities_client.clone();
                Ok::<_, RemoteError>(client.get_capabilities(request).await?.into_inner())
            })
            .await?;
        Ok(capabilities.clone())
    }

    /// Returns the subset of `digests` the remote reports it does not have.
    pub async fn find_missing(&self, digests: Vec<Digest>) -> Result<Vec<Digest>> {
        let request = FindMissingBlobsRequest {
            instance_name: self.instance_name(),
            blob_digests: digests.iter().map(Into::into).collect(),
        };
        let client = self.cas_client.clone();
        let response = retry_call(RPC_ATTEMPTS, move || {
            let mut client = client.clone();
            let request = request.clone();
            async move { Ok(client.find_missing_blobs(request).await?.into_inner()) }
        })
        .await?;
        response
            .missing_blob_digests
            .iter()
            .map(Digest::try_from)
            .collect::<std::result::Result<Vec<_>, String>>()
            .map_err(RemoteError::Other)
    }

    /// Single-shot retrieval of a batch of digests, for batches within the negotiated limit.
    pub async fn batch_read(&self, digests: Vec<Digest>) -> Result<Vec<(Digest, Bytes)>> {
        let request = BatchReadBlobsRequest {
            instance_name: self.instance_name(),
            digests: digests.iter().map(Into::into).collect(),
        };
        let mut client = self.cas_client.clone();
        let response = client.batch_read_blobs(request).await?.into_inner();
        let mut out = Vec::with_capacity(response.responses.len());
        for entry in response.responses {
            let digest = protos::require_digest(entry.digest.as_ref())?;
            if let Some(status) = entry.status {
                require_ok(&status, digest)?;
            }
            out.push((digest, entry.data));
        }
        Ok(out)
    }

    /// Single-shot upload of a batch of blobs.
    pub async fn batch_update(&self, blobs: Vec<(Digest, Bytes)>) -> Result<()> {
        let requests = blobs
            .into_iter()
            .map(|(digest, data)| protos::gen::batch_update_blobs_request::Request {
                digest: Some((&digest).into()),
                data,
            })
            .collect();
        let request = BatchUpdateBlobsRequest {
            instance_name: self.instance_name(),
            requests,
        };
        let mut client = self.cas_client.clone();
        let response = client.batch_update_blobs(request).await?.into_inner();
        for entry in response.responses {
            if let Some(status) = entry.status {
                let digest = protos::require_digest(entry.digest.as_ref())?;
                require_ok(&status, digest)?;
            }
        }
        Ok(())
    }

    /// Uploads one blob over `ByteStream.Write`, chunked at `chunk_size_bytes`.
    pub async fn upload_stream(&self, digest: Digest, bytes: Bytes) -> Result<()> {
        let resource_name = self.upload_resource_name(digest);
        let chunk_size = self.chunk_size_bytes;
        let len = digest.size_bytes;

        let stream = futures::stream::unfold((0usize, false), move |(offset, sent_any)| {
            let resource_name = resource_name.clone();
            let bytes = bytes.clone();
            async move {
                if offset >= len && sent_any {
                    None
                } else {
                    let next_offset = min(offset + chunk_size, len);
                    let request = WriteRequest {
                        resource_name,
                        write_offset: offset as i64,
                        finish_write: next_offset == len,
                        data: bytes.slice(offset..next_offset),
                    };
                    Some((request, (next_offset, true)))
                }
            }
        });

        let mut client = self.byte_stream_client.clone();
        let response = client.write(tonic::Request::new(stream)).await?.into_inner();
        if response.committed_size != len as i64 {
            return Err(RemoteError::FailedPrecondition(format!(
                "uploading {digest}: server committed {} of {len} bytes",
                response.committed_size
            )));
        }
        Ok(())
    }

    /// Downloads one blob over `ByteStream.Read`.
    pub async fn download_stream(&self, digest: Digest) -> Result<Bytes> {
        let resource_name = self.blob_resource_name(digest);
        let mut client = self.byte_stream_client.clone();
        let request = ReadRequest {
            resource_name,
            read_offset: 0,
            read_limit: 0,
        };
        let mut stream = match client.read(request).await {
            Ok(response) => response.into_inner(),
            Err(status) if status.code() == tonic::Code::NotFound => {
                return Err(RemoteError::NotFound(digest))
            }
            Err(status) => return Err(status.into()),
        };

        let mut buf = BytesMut::with_capacity(digest.size_bytes);
        while let Some(chunk) = stream.message().await? {
            buf.extend_from_slice(&chunk.data);
        }
        Ok(buf.freeze())
    }

    /// Stores `bytes` under `digest`, choosing batch vs. streaming per the negotiated capability
    /// limits: batch when the blob fits both the local and server-advertised batch limit,
    /// streaming otherwise (a server advertising `max_batch_total_size_bytes == 0` is read as
    /// imposing no additional limit beyond the local one, matching `Capabilities.Get`'s
    /// semantics elsewhere in this protocol).
    pub async fn store_bytes(&self, digest: Digest, bytes: Bytes) -> Result<()> {
        if self.find_missing(vec![digest]).await?.is_empty() {
            return Ok(());
        }

        let max_batch_total_size_bytes = self
            .get_capabilities()
            .await
            .ok()
            .and_then(|c| c.cache_capabilities)
            .map(|c| c.max_batch_total_size_bytes as usize)
            .unwrap_or(0);

        let use_batch = digest.size_bytes <= self.batch_api_size_limit
            && (max_batch_total_size_bytes == 0 || digest.size_bytes <= max_batch_total_size_bytes);

        retry_call(RPC_ATTEMPTS, || {
            let bytes = bytes.clone();
            async move {
                if use_batch {
                    self.batch_update(vec![(digest, bytes)]).await
                } else {
                    self.upload_stream(digest, bytes).await
                }
            }
        })
        .await
    }

    pub async fn load_bytes(&self, digest: Digest) -> Result<Option<Bytes>> {
        retry_call(RPC_ATTEMPTS, || async {
            match self.download_stream(digest).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(RemoteError::NotFound(_)) => Ok(None),
                Err(err) => Err(err),
            }
        })
        .await
    }

    pub async fn get_reference(&self, key: &str) -> Result<Option<Digest>> {
        let mut client = self.reference_client.clone();
        let request = GetReferenceRequest {
            instance_name: self.instance_name(),
            key: key.to_string(),
        };
        match client.get_reference(request).await {
            Ok(response) => Ok(Some(protos::require_digest(
                response.into_inner().digest.as_ref(),
            )?)),
            Err(status) if status.code() == tonic::Code::NotFound => Ok(None),
            Err(status) => Err(status.into()),
        }
    }

    pub async fn update_reference(&self, key: &str, digest: Digest) -> Result<()> {
        let mut client = self.reference_client.clone();
        let request = UpdateReferenceRequest {
            instance_name: self.instance_name(),
            key: key.to_string(),
            digest: Some((&digest).into()),
        };
        client
            .update_reference(request)
            .await
            .map_err(|status| match status.code() {
                tonic::Code::PermissionDenied => {
                    RemoteError::PermissionDenied(format!("push of reference {key} denied"))
                }
                _ => status.into(),
            })?;
        Ok(())
    }

    pub async fn remote_status(&self) -> Result<bool> {
        let mut client = self.reference_client.clone();
        let request = StatusRequest {
            instance_name: self.instance_name(),
        };
        Ok(client.status(request).await?.into_inner().allow_updates)
    }
}

fn require_ok(status: &BlobStatus, digest: Digest) -> Result<()> {
    match status.code {
        0 => Ok(()),
        1 => Err(RemoteError::NotFound(digest)),
        2 => Err(RemoteError::ResourceExhausted),
        3 => Err(RemoteError::FailedPrecondition(status.message.clone())),
        _ => Err(RemoteError::Other(status.message.clone())),
    }
}
