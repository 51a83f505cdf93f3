//! Artifact retrieval with a local byte-cache
//!
//! `get` prefers the local cache keyed by artifact id; a miss runs a
//! streamed network fetch. The cache is written only after a fully
//! successful, non-cancelled fetch, so a partial download can never
//! masquerade as a complete entry. Concurrent gets for the same id are
//! coalesced into one network fetch by the cache's initializer contract.

use crate::error::{PipelineError, Result};
use crate::model::CacheEntry;
use crate::store::StoreClient;
use bytes::BytesMut;
use chrono::Utc;
use futures::StreamExt;
use moka::future::Cache;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

pub struct ArtifactFetcher {
    store: Arc<dyn StoreClient>,
    cache: Cache<String, Arc<CacheEntry>>,
}

impl ArtifactFetcher {
    pub fn new(store: Arc<dyn StoreClient>, cache_capacity: u64) -> Self {
        Self {
            store,
            cache: Cache::new(cache_capacity),
        }
    }

    /// Cache-first retrieval of the compressed artifact.
    ///
    /// Cancellation is honoured between stream chunks; a cancelled fetch
    /// yields `Cancelled` and leaves no cache entry. Callers coalesced onto
    /// a fetch that gets cancelled see the same error and may simply retry.
    pub async fn get(
        &self,
        artifact_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<CacheEntry>> {
        let store = Arc::clone(&self.store);
        let id = artifact_id.to_string();
        let cancel = cancel.clone();

        self.cache
            .try_get_with(id.clone(), async move {
                fetch_full(store, &id, &cancel).await.map(Arc::new)
            })
            .await
            .map_err(|shared: Arc<PipelineError>| reshape_shared(&shared))
    }

    /// True when the artifact is already fully cached.
    pub fn is_cached(&self, artifact_id: &str) -> bool {
        self.cache.contains_key(artifact_id)
    }

    pub fn invalidate(&self, artifact_id: &str) {
        // moka invalidation is eventually applied; callers only use this
        // after a decode failure, where a re-fetch follows anyway.
        let cache = self.cache.clone();
        let id = artifact_id.to_string();
        tokio::spawn(async move { cache.invalidate(&id).await });
    }
}

/// Run the streamed fetch to completion or not at all.
async fn fetch_full(
    store: Arc<dyn StoreClient>,
    artifact_id: &str,
    cancel: &CancellationToken,
) -> Result<CacheEntry> {
    let mut download = store.fetch(artifact_id).await?;
    let mut buffer = BytesMut::with_capacity(download.compressed_size as usize);

    loop {
        // Race the next chunk against cancellation, so even a stalled
        // transfer is abortable.
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(artifact_id, "fetch cancelled mid-stream, discarding partial data");
                return Err(PipelineError::Cancelled);
            }
            next = download.stream.next() => match next {
                Some(chunk) => chunk?,
                None => break,
            },
        };
        buffer.extend_from_slice(&chunk);
        trace!(
            artifact_id,
            received = buffer.len(),
            total = download.compressed_size,
            "fetch progress"
        );
    }

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    if download.compressed_size > 0 && buffer.len() as u64 != download.compressed_size {
        return Err(PipelineError::transport(format!(
            "truncated fetch for {artifact_id}: got {} of {} bytes",
            buffer.len(),
            download.compressed_size
        )));
    }

    debug!(
        artifact_id,
        compressed_size = buffer.len(),
        "fetch complete, caching"
    );

    Ok(CacheEntry {
        artifact_id: artifact_id.to_string(),
        filename: download.filename,
        compressed_size: buffer.len() as u64,
        compressed_bytes: buffer.freeze(),
        original_size: download.original_size,
        cached_at: Utc::now(),
    })
}

/// The cache shares one error among coalesced waiters; rebuild an owned
/// error of the same kind for each caller.
fn reshape_shared(shared: &PipelineError) -> PipelineError {
    match shared {
        PipelineError::Cancelled => PipelineError::Cancelled,
        PipelineError::Transport(m) => PipelineError::Transport(m.clone()),
        PipelineError::Decode(m) => PipelineError::Decode(m.clone()),
        other => PipelineError::transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompressedArtifact, ContentFingerprint, DedupResult, UploadOutcome};
    use crate::store::ArtifactDownload;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store serving a fixed payload in two chunks, optionally cancelling
    /// the supplied token between them.
    struct ChunkedStore {
        payload: Vec<u8>,
        fetches: AtomicUsize,
        cancel_after_first_chunk: parking_lot::Mutex<Option<CancellationToken>>,
    }

    impl ChunkedStore {
        fn new(payload: Vec<u8>) -> Self {
            Self {
                payload,
                fetches: AtomicUsize::new(0),
                cancel_after_first_chunk: parking_lot::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl StoreClient for ChunkedStore {
        async fn check_by_name_size(&self, _: &str, _: u64) -> Result<DedupResult> {
            unreachable!()
        }
        async fn check_by_fingerprint(
            &self,
            _: &ContentFingerprint,
            _: &str,
        ) -> Result<DedupResult> {
            unreachable!()
        }
        async fn upload(&self, _: &str, _: &CompressedArtifact) -> Result<UploadOutcome> {
            unreachable!()
        }

        async fn fetch(&self, artifact_id: &str) -> Result<ArtifactDownload> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let half = self.payload.len() / 2;
            let first = Bytes::copy_from_slice(&self.payload[..half]);
            let second = Bytes::copy_from_slice(&self.payload[half..]);
            let trip = self.cancel_after_first_chunk.lock().take();

            let stream = futures::stream::iter(vec![(0usize, first), (1usize, second)])
                .map(move |(i, chunk)| {
                    if i == 1 {
                        if let Some(token) = &trip {
                            token.cancel();
                        }
                    }
                    Ok(chunk)
                })
                .boxed();

            Ok(ArtifactDownload {
                filename: format!("{artifact_id}.rawdata"),
                original_size: 4096,
                compressed_size: self.payload.len() as u64,
                stream,
            })
        }
    }

    #[tokio::test]
    async fn cache_hit_avoids_second_network_fetch() {
        let store = Arc::new(ChunkedStore::new(vec![7u8; 1000]));
        let fetcher = ArtifactFetcher::new(store.clone(), 8);
        let cancel = CancellationToken::new();

        let first = fetcher.get("art-1", &cancel).await.unwrap();
        let second = fetcher.get("art-1", &cancel).await.unwrap();

        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(first.compressed_bytes, second.compressed_bytes);
        assert_eq!(first.compressed_size, 1000);
        assert!(fetcher.is_cached("art-1"));
    }

    #[tokio::test]
    async fn cancelled_fetch_writes_nothing() {
        let store = Arc::new(ChunkedStore::new(vec![9u8; 1000]));
        let fetcher = ArtifactFetcher::new(store.clone(), 8);

        let cancel = CancellationToken::new();
        *store.cancel_after_first_chunk.lock() = Some(cancel.clone());

        let err = fetcher.get("art-2", &cancel).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(!fetcher.is_cached("art-2"));

        // A later request performs a full network fetch, not a partial hit.
        let fresh = CancellationToken::new();
        let entry = fetcher.get("art-2", &fresh).await.unwrap();
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(entry.compressed_size, 1000);
    }

    #[tokio::test]
    async fn concurrent_gets_coalesce_into_one_fetch() {
        let store = Arc::new(ChunkedStore::new(vec![5u8; 2000]));
        let fetcher = Arc::new(ArtifactFetcher::new(store.clone(), 8));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let fetcher = Arc::clone(&fetcher);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                fetcher.get("art-3", &cancel).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_interrupts_a_stalled_stream() {
        use std::time::Duration;

        struct StallingStore;

        #[async_trait]
        impl StoreClient for StallingStore {
            async fn check_by_name_size(&self, _: &str, _: u64) -> Result<DedupResult> {
                unreachable!()
            }
            async fn check_by_fingerprint(
                &self,
                _: &ContentFingerprint,
                _: &str,
            ) -> Result<DedupResult> {
                unreachable!()
            }
            async fn upload(&self, _: &str, _: &CompressedArtifact) -> Result<UploadOutcome> {
                unreachable!()
            }
            async fn fetch(&self, _: &str) -> Result<ArtifactDownload> {
                // One chunk, then silence forever.
                let head = futures::stream::iter(vec![Ok(Bytes::from_static(&[1u8; 100]))]);
                Ok(ArtifactDownload {
                    filename: "s.rawdata".into(),
                    original_size: 1000,
                    compressed_size: 1000,
                    stream: head.chain(futures::stream::pending()).boxed(),
                })
            }
        }

        let fetcher = ArtifactFetcher::new(Arc::new(StallingStore), 8);
        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trip.cancel();
        });

        let err = fetcher.get("stalled", &cancel).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(!fetcher.is_cached("stalled"));
    }

    #[tokio::test]
    async fn truncated_fetch_is_a_transport_error() {
        struct TruncatingStore;

        #[async_trait]
        impl StoreClient for TruncatingStore {
            async fn check_by_name_size(&self, _: &str, _: u64) -> Result<DedupResult> {
                unreachable!()
            }
            async fn check_by_fingerprint(
                &self,
                _: &ContentFingerprint,
                _: &str,
            ) -> Result<DedupResult> {
                unreachable!()
            }
            async fn upload(&self, _: &str, _: &CompressedArtifact) -> Result<UploadOutcome> {
                unreachable!()
            }
            async fn fetch(&self, _: &str) -> Result<ArtifactDownload> {
                Ok(ArtifactDownload {
                    filename: "t.rawdata".into(),
                    original_size: 100,
                    compressed_size: 100, // claims 100, sends 10
                    stream: futures::stream::iter(vec![Ok(Bytes::from_static(&[0u8; 10]))])
                        .boxed(),
                })
            }
        }

        let fetcher = ArtifactFetcher::new(Arc::new(TruncatingStore), 8);
        let err = fetcher
            .get("short", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Transport(_)));
        assert!(!fetcher.is_cached("short"));
    }
}
