//! 传感器数据摄取与检索管道
//!
//! Content-addressable ingestion and retrieval for large sensor capture
//! files. The ingest half validates candidate files, runs a one-pass
//! MD5-fingerprint + framed-zstd compression, negotiates two-phase dedup
//! with the storage backend, and uploads through a bounded worker pool with
//! per-file task tracking. The retrieval half fetches compressed artifacts
//! cache-first, decompresses them progressively into line batches, and
//! serves a virtual window over the decoded lines.
//!
//! Entry points: [`ingest::IngestPipeline`] for uploads,
//! [`retrieval::RetrievalService`] for reads (it keys sessions by artifact
//! id, so repeated loads attach to the accumulated state instead of
//! re-fetching or re-decoding). Wire transport lives behind the
//! [`store::StoreClient`] trait.

pub mod archive;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod intake;
pub mod logging;
pub mod model;
pub mod retrieval;
pub mod scheduler;
pub mod store;
pub mod tasks;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use ingest::IngestPipeline;
pub use model::{
    CompressedArtifact, ContentFingerprint, DedupResult, FrameIndex, IncomingFile, TaskId,
    TaskState, UploadOutcome, UploadTask,
};
pub use retrieval::{DocumentSession, RetrievalService};
pub use store::{HttpStoreClient, StoreClient};
pub use tasks::{TaskEvent, TaskRegistry, TaskRegistryConfig};
