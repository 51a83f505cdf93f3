//! HTTP implementation of the storage backend client
//!
//! Wire contract:
//! - `GET  /files/check?filename=&size=`  → `{exists, exact_match}`
//! - `GET  /files/check?hash=&filename=`  → `{exists, exact_match}`
//! - `POST /files/upload` multipart (`<name>.zst` blob, `md5`, `filename`,
//!   `original_size`, optional `frame_index` JSON) → `{data: {is_duplicate, file?}}`
//! - `GET  /files/{id}/content` → streamed compressed bytes; `X-File-Name`,
//!   `X-Original-Size`, `X-Compressed-Size` headers carry metadata.
//!
//! Every failure here is `Transport` — retryable, and distinct from the
//! validation/safety/dedup kinds.

use crate::error::{PipelineError, Result};
use crate::model::{
    CompressedArtifact, ContentFingerprint, DedupResult, StoredArtifact, UploadOutcome,
};
use crate::store::{ArtifactDownload, StoreClient};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

pub struct HttpStoreClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    data: UploadData,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    is_duplicate: bool,
    file: Option<StoredArtifact>,
}

impl HttpStoreClient {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, client }
    }

    async fn check(&self, query: &[(&str, String)]) -> Result<DedupResult> {
        let response = self
            .client
            .get(format!("{}/files/check", self.base_url))
            .query(query)
            .send()
            .await
            .map_err(|e| PipelineError::transport(format!("check request failed: {e}")))?
            .error_for_status()
            .map_err(|e| PipelineError::transport(format!("check returned error: {e}")))?;
        response
            .json::<DedupResult>()
            .await
            .map_err(|e| PipelineError::transport(format!("malformed check response: {e}")))
    }

    fn header_str(response: &reqwest::Response, name: &str) -> Result<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PipelineError::transport(format!("missing {name} header")))
    }

    fn header_u64(response: &reqwest::Response, name: &str) -> Result<u64> {
        Self::header_str(response, name)?
            .parse()
            .map_err(|e| PipelineError::transport(format!("invalid {name} header: {e}")))
    }
}

#[async_trait]
impl StoreClient for HttpStoreClient {
    async fn check_by_name_size(&self, filename: &str, size: u64) -> Result<DedupResult> {
        self.check(&[
            ("filename", filename.to_string()),
            ("size", size.to_string()),
        ])
        .await
    }

    async fn check_by_fingerprint(
        &self,
        fingerprint: &ContentFingerprint,
        filename: &str,
    ) -> Result<DedupResult> {
        self.check(&[
            ("hash", fingerprint.to_hex()),
            ("filename", filename.to_string()),
        ])
        .await
    }

    async fn upload(&self, filename: &str, artifact: &CompressedArtifact) -> Result<UploadOutcome> {
        let frame_index_json = serde_json::to_string(&artifact.frame_index)
            .map_err(|e| PipelineError::transport(format!("frame index serialization: {e}")))?;

        let blob = Part::bytes(artifact.compressed_bytes.to_vec())
            .file_name(format!("{filename}.zst"))
            .mime_str("application/zstd")
            .map_err(|e| PipelineError::transport(format!("multipart assembly: {e}")))?;

        let form = Form::new()
            .part("file", blob)
            .text("md5", artifact.fingerprint.to_hex())
            .text("filename", filename.to_string())
            .text("original_size", artifact.original_size.to_string())
            .text("frame_index", frame_index_json);

        debug!(
            filename,
            compressed_size = artifact.compressed_bytes.len(),
            "uploading artifact"
        );

        let response = self
            .client
            .post(format!("{}/files/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::transport(format!("upload request failed: {e}")))?
            .error_for_status()
            .map_err(|e| PipelineError::transport(format!("upload returned error: {e}")))?;

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::transport(format!("malformed upload response: {e}")))?;

        if body.data.is_duplicate {
            info!(filename, "server reported duplicate content");
            Ok(UploadOutcome::AlreadyExists)
        } else {
            let stored = body.data.file.ok_or_else(|| {
                PipelineError::transport("upload response missing file record".to_string())
            })?;
            Ok(UploadOutcome::Created(stored))
        }
    }

    async fn fetch(&self, artifact_id: &str) -> Result<ArtifactDownload> {
        let response = self
            .client
            .get(format!("{}/files/{artifact_id}/content", self.base_url))
            .send()
            .await
            .map_err(|e| PipelineError::transport(format!("fetch request failed: {e}")))?
            .error_for_status()
            .map_err(|e| PipelineError::transport(format!("fetch returned error: {e}")))?;

        let filename = Self::header_str(&response, "X-File-Name")?;
        let original_size = Self::header_u64(&response, "X-Original-Size")?;
        let compressed_size = Self::header_u64(&response, "X-Compressed-Size")?;

        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| PipelineError::transport(format!("fetch stream failed: {e}")))
            })
            .boxed();

        Ok(ArtifactDownload {
            filename,
            original_size,
            compressed_size,
            stream,
        })
    }
}
