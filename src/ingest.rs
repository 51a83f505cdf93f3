//! 摄取管道编排
//!
//! Ties the pieces together for one drop of files: intake validation,
//! two-phase dedup around the fingerprint-compress engine, and the upload
//! transport, with per-file task tracking throughout. Archives get the
//! safety gate first, then serial extraction feeding a bounded set of
//! concurrent uploads — extraction of the next entry waits until an upload
//! slot frees up, so peak memory stays proportional to the pool width, not
//! the archive size.
//!
//! Every failure is local to its task: one rejected or failed file never
//! blocks the rest of the drop.

use crate::archive::{ArchiveReader, SafetyAnalyzer};
use crate::config::{IngestConfig, PipelineConfig, SafetyPolicy};
use crate::dedup::DedupNegotiator;
use crate::engine;
use crate::error::{PipelineError, Result};
use crate::intake::{self, IntakeDecision};
use crate::model::{IncomingFile, SafetyVerdict, TaskId, UploadOutcome};
use crate::scheduler::BoundedScheduler;
use crate::store::StoreClient;
use crate::tasks::TaskRegistry;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// 摄取管道
#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn StoreClient>,
    tasks: TaskRegistry,
    config: IngestConfig,
    safety: SafetyPolicy,
    // One pipeline-wide pool of upload slots: plain files and archive
    // entries compete for the same permits, so the width bound holds
    // across a whole drop, not per source.
    upload_slots: Arc<Semaphore>,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn StoreClient>, tasks: TaskRegistry, config: &PipelineConfig) -> Self {
        Self {
            store,
            tasks,
            config: config.ingest.clone(),
            safety: config.safety.clone(),
            upload_slots: Arc::new(Semaphore::new(config.ingest.concurrency)),
        }
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Ingest a drop of files. At most `concurrency` uploads run at once;
    /// the returned task ids are in drop order. An archive contributes one
    /// task per extracted target entry, or a single errored task when the
    /// archive as a whole is refused.
    pub async fn ingest(&self, files: Vec<IncomingFile>) -> Vec<TaskId> {
        let scheduler = BoundedScheduler::new(self.config.concurrency);
        let units: Vec<_> = files
            .into_iter()
            .map(|file| {
                let pipeline = self.clone();
                move || async move { pipeline.ingest_one(file).await }
            })
            .collect();
        scheduler.run(units).await.into_iter().flatten().collect()
    }

    async fn ingest_one(&self, file: IncomingFile) -> Vec<TaskId> {
        match file.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("zip") => self.ingest_archive(file).await,
            _ => {
                let task = self
                    .tasks
                    .add_task(&file.filename, file.bytes.len() as u64)
                    .await;
                let Ok(_permit) = self.upload_slots.clone().acquire_owned().await else {
                    self.tasks.mark_error(task, "ingest pipeline shut down");
                    return vec![task];
                };
                self.run_payload(task, &file.filename, file.bytes).await;
                vec![task]
            }
        }
    }

    /// Run one payload to a terminal task state; errors land on the task.
    async fn run_payload(&self, task: TaskId, filename: &str, bytes: Bytes) {
        if let Err(e) = self.process_payload(task, filename, bytes).await {
            warn!(filename, error = %e, "payload ingest failed");
            self.tasks.mark_error(task, e.to_string());
        }
    }

    async fn process_payload(&self, task: TaskId, filename: &str, bytes: Bytes) -> Result<()> {
        if let IntakeDecision::Reject(reason) = intake::validate_prefix(&bytes) {
            return Err(PipelineError::UnsupportedFormat(reason));
        }

        let negotiator = DedupNegotiator::new(self.store.as_ref());
        let original_size = bytes.len() as u64;

        // Phase 1: cheap name+size probe; an exact hit skips all the work.
        if let Some(hit) = negotiator.phase1(filename, original_size).await {
            if hit.exact_match {
                info!(filename, "phase-1 dedup hit, skipping upload");
                self.tasks
                    .mark_completed(task, Some("already uploaded".to_string()));
                return Ok(());
            }
        }

        // The engine pass accounts for the first 90 percent; the remaining
        // stretch belongs to the transport send, so a task never shows 100
        // while the POST is still in flight.
        const COMPRESSION_SPAN: u64 = 90;
        let registry = self.tasks.clone();
        let artifact = engine::compress_bytes(
            &bytes,
            self.config.compression_level,
            self.config.frame_size,
            |read| {
                let percent = if original_size == 0 {
                    COMPRESSION_SPAN as u8
                } else {
                    (read.saturating_mul(COMPRESSION_SPAN) / original_size)
                        .min(COMPRESSION_SPAN) as u8
                };
                registry.update_progress(task, percent);
            },
        )
        .await?;

        // Phase 2: authoritative fingerprint probe.
        let verdict = negotiator.phase2(&artifact.fingerprint, filename).await?;
        if verdict.exact_match {
            info!(filename, fingerprint = %artifact.fingerprint, "duplicate content, upload skipped");
            self.tasks
                .mark_completed(task, Some("duplicate content, upload skipped".to_string()));
            return Ok(());
        }

        match self.store.upload(filename, &artifact).await? {
            UploadOutcome::Created(stored) => {
                debug!(filename, artifact_id = %stored.id, "upload complete");
                self.tasks.mark_completed(task, None);
            }
            // A concurrent uploader won the race after our probe; the
            // content is stored either way.
            UploadOutcome::AlreadyExists => {
                self.tasks
                    .mark_completed(task, Some("duplicate detected by server".to_string()));
            }
        }
        Ok(())
    }

    async fn ingest_archive(&self, file: IncomingFile) -> Vec<TaskId> {
        let archive_size = file.bytes.len() as u64;
        match self.run_archive(file.bytes).await {
            Ok(entry_tasks) => entry_tasks,
            // Refusing the container gets its own visible task; nothing was
            // extracted, so there are no entry tasks to attach the error to.
            Err(e) => {
                warn!(filename = %file.filename, error = %e, "archive ingest failed");
                let task = self.tasks.add_task(&file.filename, archive_size).await;
                self.tasks.mark_error(task, e.to_string());
                vec![task]
            }
        }
    }

    async fn run_archive(&self, bytes: Bytes) -> Result<Vec<TaskId>> {
        let mut reader = ArchiveReader::open(bytes)?;
        let declared = reader.declared_entries()?;

        let analyzer = SafetyAnalyzer::new(self.safety.clone(), &self.config.target_extension);
        let report = analyzer.analyze(&declared, reader.compressed_size());
        if let SafetyVerdict::Rejected(metric) = &report.verdict {
            // Nothing was inflated; the whole archive is refused.
            let metric = if metric.as_str() == "size" {
                "size"
            } else {
                "ratio"
            };
            return Err(PipelineError::ArchiveBomb {
                metric,
                message: format!(
                    "declared {} bytes at ratio {:.1}",
                    report.total_uncompressed_estimate, report.ratio
                ),
            });
        }

        let mut uploads = JoinSet::new();
        let mut entry_tasks = Vec::new();

        for (index, entry) in declared.iter().enumerate() {
            if entry.is_directory || !self.is_target_entry(&entry.name) {
                continue;
            }

            // Backpressure: do not inflate the next entry until an upload
            // slot is free.
            let permit = self
                .upload_slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::Cancelled)?;

            let display_name = entry_basename(&entry.name);
            let task = self
                .tasks
                .add_task(&display_name, entry.uncompressed_size)
                .await;
            entry_tasks.push(task);

            match reader.extract_entry(index, &self.config.default_passphrase) {
                Ok((_, payload)) => {
                    let pipeline = self.clone();
                    uploads.spawn(async move {
                        pipeline.run_payload(task, &display_name, payload).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    warn!(entry = %entry.name, error = %e, "entry extraction failed");
                    self.tasks.mark_error(task, e.to_string());
                    drop(permit);
                }
            }
        }

        while let Some(joined) = uploads.join_next().await {
            if joined.is_err() {
                warn!("archive upload worker panicked");
            }
        }

        debug!(entries = entry_tasks.len(), "archive processed");
        Ok(entry_tasks)
    }

    fn is_target_entry(&self, name: &str) -> bool {
        std::path::Path::new(name)
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.config.target_extension))
            .unwrap_or(false)
    }
}

/// Entry names may carry internal archive folders; stored artifacts are
/// keyed by the bare filename.
fn entry_basename(name: &str) -> String {
    std::path::Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_string()
}
