//! Two-phase dedup negotiation
//!
//! Phase 1 runs before compression and exists purely to dodge the
//! compression cost for the common re-upload case; it is allowed to fail
//! silently. Phase 2 runs on the content fingerprint and is authoritative.
//! Both probes are idempotent.
//!
//! Deliberate trade-off, inherited from the observed behavior: phase 1
//! matches on `(filename, size)` only, so two distinct files that happen to
//! share both will be treated as a re-upload and skipped. That is "good
//! enough" for capture files whose names embed device/serial/timestamp.

use crate::error::{PipelineError, Result};
use crate::model::{ContentFingerprint, DedupResult};
use crate::store::StoreClient;
use tracing::{debug, warn};

pub struct DedupNegotiator<'a> {
    store: &'a dyn StoreClient,
}

impl<'a> DedupNegotiator<'a> {
    pub fn new(store: &'a dyn StoreClient) -> Self {
        Self { store }
    }

    /// Fast pre-compression probe by `(filename, original_size)`.
    ///
    /// Probe failures are logged and swallowed — the pipeline falls through
    /// to phase 2, which will catch duplicates anyway.
    pub async fn phase1(&self, filename: &str, original_size: u64) -> Option<DedupResult> {
        match self.store.check_by_name_size(filename, original_size).await {
            Ok(result) => {
                debug!(filename, ?result, "phase-1 dedup probe");
                Some(result)
            }
            Err(e) => {
                warn!(filename, error = %e, "phase-1 dedup probe failed, continuing");
                None
            }
        }
    }

    /// Authoritative post-compression probe by `(fingerprint, filename)`.
    ///
    /// Failures here propagate: the caller cannot safely decide whether to
    /// upload without an answer.
    pub async fn phase2(
        &self,
        fingerprint: &ContentFingerprint,
        filename: &str,
    ) -> Result<DedupResult> {
        let result = self
            .store
            .check_by_fingerprint(fingerprint, filename)
            .await
            .map_err(|e| PipelineError::Dedup(format!("fingerprint probe failed: {e}")))?;
        debug!(filename, %fingerprint, ?result, "phase-2 dedup probe");
        Ok(result)
    }
}
