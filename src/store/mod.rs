//! 存储后端接口
//!
//! The REST storage backend is an external collaborator; the pipeline only
//! sees this trait. Passing the client in explicitly (instead of a module
//! singleton) keeps every component testable against an in-memory store.

pub mod http;

use crate::error::Result;
use crate::model::{CompressedArtifact, ContentFingerprint, DedupResult, UploadOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

pub use http::HttpStoreClient;

/// A compressed artifact coming back from the store: out-of-band metadata
/// from response headers plus the streamed body.
pub struct ArtifactDownload {
    pub filename: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub stream: BoxStream<'static, Result<Bytes>>,
}

/// Operations the pipeline needs from the storage backend. All probe calls
/// are idempotent and safe to retry.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Phase-1 dedup probe: name + size only, run before compression.
    async fn check_by_name_size(&self, filename: &str, size: u64) -> Result<DedupResult>;

    /// Phase-2 dedup probe: authoritative, by content fingerprint.
    async fn check_by_fingerprint(
        &self,
        fingerprint: &ContentFingerprint,
        filename: &str,
    ) -> Result<DedupResult>;

    /// Upload the compressed artifact plus metadata as one multipart request.
    async fn upload(&self, filename: &str, artifact: &CompressedArtifact) -> Result<UploadOutcome>;

    /// Fetch a compressed artifact by id as a byte stream.
    async fn fetch(&self, artifact_id: &str) -> Result<ArtifactDownload>;
}
