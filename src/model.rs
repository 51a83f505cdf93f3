//! 核心数据模型
//!
//! Shared types flowing between the pipeline components: content
//! fingerprints, the compressed frame index, dedup/upload results, the
//! safety analyzer's report, and the retrieval cache entry.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// MD5 digest over the full uncompressed byte stream of an artifact.
///
/// The storage backend keys physical content by this digest, so two
/// artifacts with equal fingerprints are the same content regardless of
/// filename. Always computed in a single pass (see `engine`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(pub [u8; 16]);

impl ContentFingerprint {
    /// Hex rendering used on the wire (`md5` form field, check probes).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// One independently-decodable compressed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameEntry {
    /// Byte offset of this frame in the compressed output.
    pub frame_offset: u64,
    /// Compressed length of this frame.
    pub frame_compressed_length: u64,
    /// Total uncompressed bytes covered up to and including this frame.
    pub cumulative_uncompressed_length: u64,
}

/// Ordered frame table produced as a side effect of compression.
///
/// Invariant: offsets are monotonic and `frame_offset +
/// frame_compressed_length` of entry *i* equals `frame_offset` of entry
/// *i + 1* — the frames cover the compressed stream with no gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameIndex {
    pub entries: Vec<FrameEntry>,
}

impl FrameIndex {
    pub fn push(&mut self, entry: FrameEntry) {
        debug_assert!(
            self.entries.last().map_or(entry.frame_offset == 0, |prev| {
                prev.frame_offset + prev.frame_compressed_length == entry.frame_offset
                    && prev.cumulative_uncompressed_length <= entry.cumulative_uncompressed_length
            }),
            "frame index entries must be contiguous and monotonic"
        );
        self.entries.push(entry);
    }

    pub fn frame_count(&self) -> usize {
        self.entries.len()
    }

    /// Total uncompressed size covered by the index.
    pub fn uncompressed_size(&self) -> u64 {
        self.entries
            .last()
            .map(|e| e.cumulative_uncompressed_length)
            .unwrap_or(0)
    }

    /// Total compressed size covered by the index.
    pub fn compressed_size(&self) -> u64 {
        self.entries
            .last()
            .map(|e| e.frame_offset + e.frame_compressed_length)
            .unwrap_or(0)
    }
}

/// Output of the fingerprint-compress engine: everything the upload
/// transport needs, produced in one pass.
#[derive(Debug, Clone)]
pub struct CompressedArtifact {
    pub fingerprint: ContentFingerprint,
    pub compressed_bytes: Bytes,
    pub frame_index: FrameIndex,
    pub original_size: u64,
}

/// Answer from a dedup probe.
///
/// `exact_match = true` means same fingerprint (or, for phase 1, same
/// name+size); `exists = true, exact_match = false` means the name is taken
/// by different content and the caller must still upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupResult {
    pub exists: bool,
    pub exact_match: bool,
}

/// Server-side artifact record echoed back by a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub id: String,
    pub filename: String,
    pub original_size: u64,
}

/// Terminal outcome of an upload transport call.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// New artifact created; merge it into any in-memory listing.
    Created(StoredArtifact),
    /// The server independently detected duplicate content (race with a
    /// concurrent uploader after our phase-2 probe).
    AlreadyExists,
}

/// One enumerated archive entry, from declared metadata only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntryInfo {
    pub name: String,
    /// Declared (not verified) uncompressed size.
    pub size: u64,
    /// Whether the entry name carries the expected payload extension.
    pub is_target_type: bool,
    pub is_encrypted: bool,
}

/// Safety analyzer decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyVerdict {
    Safe,
    /// Reason is the metric that fired: "size" or "ratio".
    Rejected(String),
}

/// Full analyzer output: verdict plus the figures behind it, for the
/// caller's visibility into what the archive claims to contain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyReport {
    pub total_uncompressed_estimate: u64,
    pub ratio: f64,
    pub entries: Vec<ArchiveEntryInfo>,
    pub verdict: SafetyVerdict,
}

/// Cached compressed artifact, keyed by artifact id. Written only after a
/// fully successful, non-cancelled fetch.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub artifact_id: String,
    pub filename: String,
    pub compressed_bytes: Bytes,
    pub original_size: u64,
    pub compressed_size: u64,
    pub cached_at: DateTime<Utc>,
}

/// Opaque task identifier handed to UI layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Uploading,
    Completed,
    Errored,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }
}

/// Ephemeral per-file upload task, owned exclusively by the task registry.
#[derive(Debug, Clone, Serialize)]
pub struct UploadTask {
    pub id: TaskId,
    pub filename: String,
    pub total_bytes: u64,
    pub progress_percent: u8,
    pub state: TaskState,
    pub message: Option<String>,
    #[serde(skip)]
    pub created_at: std::time::Instant,
    #[serde(skip)]
    pub completed_at: Option<std::time::Instant>,
}

/// A candidate file handed to the ingest pipeline by the client.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub filename: String,
    pub bytes: Bytes,
}

impl IncomingFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    pub fn extension(&self) -> Option<&str> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|s| s.to_str())
    }
}
