//! Per-artifact retrieval sessions
//!
//! `RetrievalService::load` is the read-side entry point: it keys decode
//! sessions by artifact id, so a repeated load of an id that is in flight
//! or already decoded attaches to the existing session's accumulated line
//! store instead of fetching or decoding again. Only a session that ended
//! in abort or error is replaced by the next load of its id.
//!
//! The session owns the lines; viewers read through it (`lines_in`,
//! `search`) while the driver task keeps absorbing decoder batches.

use crate::config::RetrievalConfig;
use crate::error::PipelineError;
use crate::retrieval::decoder::{DecodeState, StreamingDecoder};
use crate::retrieval::fetcher::ArtifactFetcher;
use crate::retrieval::window::{LineStore, SearchMatches};
use crate::store::StoreClient;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 检索服务
pub struct RetrievalService {
    fetcher: Arc<ArtifactFetcher>,
    decoder: StreamingDecoder,
    sessions: Mutex<HashMap<String, Arc<DocumentSession>>>,
}

impl RetrievalService {
    pub fn new(store: Arc<dyn StoreClient>, config: &RetrievalConfig) -> Self {
        Self {
            fetcher: Arc::new(ArtifactFetcher::new(store, config.cache_capacity)),
            decoder: StreamingDecoder::new(config),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn fetcher(&self) -> &ArtifactFetcher {
        &self.fetcher
    }

    /// Open the session for an artifact id, or re-attach to the live one.
    ///
    /// An id whose session is still streaming (or complete) gets the same
    /// session back — one fetch, one decoder, however many viewers. A
    /// session that ended in `Aborted` or `Errored` is stale and gets
    /// replaced by a fresh one.
    pub fn load(&self, artifact_id: &str) -> Arc<DocumentSession> {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(artifact_id) {
            if !matches!(
                existing.state(),
                DecodeState::Aborted | DecodeState::Errored
            ) {
                debug!(artifact_id, "attaching to existing session");
                return Arc::clone(existing);
            }
        }
        let session = DocumentSession::spawn(
            artifact_id,
            Arc::clone(&self.fetcher),
            self.decoder.clone(),
        );
        sessions.insert(artifact_id.to_string(), Arc::clone(&session));
        session
    }
}

/// One open document: the decode driver plus its progressively filled
/// line store.
pub struct DocumentSession {
    artifact_id: String,
    lines: RwLock<LineStore>,
    state: watch::Receiver<DecodeState>,
    cancel: CancellationToken,
}

impl DocumentSession {
    fn spawn(
        artifact_id: &str,
        fetcher: Arc<ArtifactFetcher>,
        decoder: StreamingDecoder,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(DecodeState::Idle);
        let session = Arc::new(Self {
            artifact_id: artifact_id.to_string(),
            lines: RwLock::new(LineStore::new()),
            state: state_rx,
            cancel: cancel.clone(),
        });

        let driver = Arc::clone(&session);
        tokio::spawn(async move {
            let _ = state_tx.send(DecodeState::Streaming);
            let terminal = driver.run(&fetcher, &decoder).await;
            let _ = state_tx.send(terminal);
        });
        session
    }

    async fn run(&self, fetcher: &ArtifactFetcher, decoder: &StreamingDecoder) -> DecodeState {
        let entry = match fetcher.get(&self.artifact_id, &self.cancel).await {
            Ok(entry) => entry,
            Err(PipelineError::Cancelled) => return DecodeState::Aborted,
            Err(e) => {
                warn!(artifact_id = %self.artifact_id, error = %e, "artifact fetch failed");
                return DecodeState::Errored;
            }
        };

        let (decode, mut batches) = decoder.start(
            decoder.rechunk(entry.compressed_bytes.clone()),
            self.cancel.clone(),
        );
        while let Some(batch) = batches.recv().await {
            self.lines.write().absorb(batch);
        }
        let terminal = decode.finished().await;
        if terminal == DecodeState::Errored {
            // A blob that failed to decode must not be served again.
            fetcher.invalidate(&self.artifact_id);
        }
        terminal
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    pub fn state(&self) -> DecodeState {
        *self.state.borrow()
    }

    /// Cancel this session's fetch/decode. Other sessions are untouched.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Wait until the session reaches a terminal state.
    pub async fn wait_terminal(&self) -> DecodeState {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            if matches!(
                current,
                DecodeState::Complete | DecodeState::Aborted | DecodeState::Errored
            ) {
                return current;
            }
            if state.changed().await.is_err() {
                return *state.borrow();
            }
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.read().len()
    }

    pub fn is_complete(&self) -> bool {
        self.lines.read().is_complete()
    }

    /// Materialise the lines a window asked for; clamped to what has been
    /// decoded so far.
    pub fn lines_in(&self, range: Range<usize>) -> Vec<String> {
        self.lines.read().slice(range).to_vec()
    }

    /// Scan the lines loaded so far. Re-run it once the session completes
    /// (or as more batches land) to pick up later matches.
    pub fn search(&self, term: &str) -> SearchMatches {
        SearchMatches::scan(&self.lines.read(), term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine;
    use crate::error::Result;
    use crate::model::{CompressedArtifact, ContentFingerprint, DedupResult, UploadOutcome};
    use crate::store::ArtifactDownload;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Store serving one fixed compressed artifact in slow chunks, counting
    /// how many fetches were started.
    struct CountingStore {
        compressed: Bytes,
        original_size: u64,
        fetches: AtomicUsize,
        chunk_delay: Duration,
    }

    impl CountingStore {
        async fn with_lines(lines: usize, chunk_delay: Duration) -> Self {
            let mut data = Vec::new();
            for i in 0..lines {
                data.extend_from_slice(format!("{i},0.5,0.25,9.81\n").as_bytes());
            }
            let artifact = engine::compress_bytes(&data, 3, 16 * 1024, |_| {})
                .await
                .unwrap();
            Self {
                compressed: artifact.compressed_bytes,
                original_size: data.len() as u64,
                fetches: AtomicUsize::new(0),
                chunk_delay,
            }
        }
    }

    #[async_trait]
    impl StoreClient for CountingStore {
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
            let quarter = (self.compressed.len() / 4).max(1);
            let chunks: Vec<Result<Bytes>> = self
                .compressed
                .chunks(quarter)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            let delay = self.chunk_delay;
            let stream = futures::stream::iter(chunks)
                .then(move |c| async move {
                    tokio::time::sleep(delay).await;
                    c
                })
                .boxed();
            Ok(ArtifactDownload {
                filename: format!("{artifact_id}.rawdata"),
                original_size: self.original_size,
                compressed_size: self.compressed.len() as u64,
                stream,
            })
        }
    }

    fn service(store: Arc<CountingStore>) -> RetrievalService {
        let config = RetrievalConfig {
            chunk_size: 4096,
            line_batch_size: 500,
            ..RetrievalConfig::default()
        };
        RetrievalService::new(store, &config)
    }

    #[tokio::test]
    async fn second_load_attaches_to_in_flight_session() {
        let store = Arc::new(CountingStore::with_lines(2_000, Duration::from_millis(10)).await);
        let service = service(store.clone());

        let first = service.load("doc-1");
        let second = service.load("doc-1");
        assert!(Arc::ptr_eq(&first, &second), "same id must share a session");

        assert_eq!(first.wait_terminal().await, DecodeState::Complete);
        // One fetch, one decoder: the line store was filled exactly once.
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(second.line_count(), 2_000);
        assert!(second.is_complete());
    }

    #[tokio::test]
    async fn completed_session_serves_repeat_loads() {
        let store = Arc::new(CountingStore::with_lines(1_000, Duration::ZERO).await);
        let service = service(store.clone());

        let first = service.load("doc-2");
        assert_eq!(first.wait_terminal().await, DecodeState::Complete);

        let again = service.load("doc-2");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(again.line_count(), 1_000);
        assert_eq!(again.lines_in(0..1), vec!["0,0.5,0.25,9.81".to_string()]);
    }

    #[tokio::test]
    async fn aborted_session_is_replaced_on_next_load() {
        let store = Arc::new(CountingStore::with_lines(2_000, Duration::from_millis(10)).await);
        let service = service(store.clone());

        let first = service.load("doc-3");
        first.abort();
        assert_eq!(first.wait_terminal().await, DecodeState::Aborted);

        let second = service.load("doc-3");
        assert!(!Arc::ptr_eq(&first, &second), "stale session must be replaced");
        assert_eq!(second.wait_terminal().await, DecodeState::Complete);
        assert_eq!(second.line_count(), 2_000);
        // The cancelled fetch wrote nothing, so the retry fetched again.
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn search_runs_over_the_session_lines() {
        let store = Arc::new(CountingStore::with_lines(1_000, Duration::ZERO).await);
        let service = service(store);

        let session = service.load("doc-4");
        assert_eq!(session.wait_terminal().await, DecodeState::Complete);

        let mut matches = session.search("999,0.5");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches.next(), Some(999));
    }
}
