//! 管道配置
//!
//! Sectioned configuration with validation, mirroring the layered layout of
//! the rest of the crate: ingest, archive safety, and retrieval. All
//! observed constants are defaults here rather than hard-coded at the use
//! site, so deployments can tune them without a rebuild.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// 全局配置根结构
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    #[validate(nested)]
    pub ingest: IngestConfig,

    #[validate(nested)]
    pub safety: SafetyPolicy,

    #[validate(nested)]
    pub retrieval: RetrievalConfig,
}

/// 摄取配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IngestConfig {
    /// Worker-pool width for files-in-a-drop and uploads-per-archive.
    #[validate(range(min = 1, max = 64))]
    pub concurrency: usize,

    /// Payload extension queued for extraction from archives.
    #[validate(length(min = 1, max = 32))]
    pub target_extension: String,

    /// zstd compression level handed to the engine.
    #[validate(range(min = 1, max = 19))]
    pub compression_level: i32,

    /// Uncompressed bytes per independently-decodable frame.
    #[validate(range(min = 65536, max = 67108864))]
    pub frame_size: usize,

    /// Passphrase attempted on encrypted archive entries before giving up.
    pub default_passphrase: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            target_extension: "rawdata".to_string(),
            compression_level: 3,
            frame_size: 1024 * 1024, // 1 MiB uncompressed per frame
            default_passphrase: "sensor".to_string(),
        }
    }
}

/// 归档安全策略
///
/// The thresholds are the observed production defaults; they are exposed as
/// configuration rather than re-derived.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SafetyPolicy {
    /// Absolute ceiling on summed declared uncompressed sizes.
    #[validate(range(min = 1048576))]
    pub max_total_uncompressed: u64,

    /// Expansion-ratio ceiling (declared uncompressed / archive size).
    #[validate(range(min = 1.0))]
    pub max_ratio: f64,

    /// The ratio check only applies above this total, so legitimately
    /// compressible small text archives are not rejected.
    #[validate(range(min = 0))]
    pub ratio_size_floor: u64,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            max_total_uncompressed: 3 * 1024 * 1024 * 1024, // 3 GiB
            max_ratio: 200.0,
            ratio_size_floor: 100 * 1024 * 1024, // 100 MiB
        }
    }
}

/// 检索配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetrievalConfig {
    /// Client-side re-chunking of cached blobs fed to the decoder.
    #[validate(range(min = 4096, max = 16777216))]
    pub chunk_size: usize,

    /// Completed lines are flushed to the renderer once the accumulator
    /// crosses this newline count.
    #[validate(range(min = 1, max = 1000000))]
    pub line_batch_size: usize,

    /// Virtual-window buffer margin, in lines, on each side of the viewport.
    #[validate(range(min = 0, max = 10000))]
    pub buffer_margin: usize,

    /// Fixed per-line height in pixels for scroll-extent math.
    #[validate(range(min = 1, max = 200))]
    pub line_height: u32,

    /// Maximum cached compressed artifacts.
    #[validate(range(min = 1, max = 10000))]
    pub cache_capacity: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024, // 256 KiB slices keep the UI thread live
            line_batch_size: 5000,
            buffer_margin: 80,
            line_height: 20,
            cache_capacity: 32,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a TOML config file. Missing sections fall back to
    /// defaults via serde.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(raw)
            .map_err(|e| PipelineError::Config(format!("invalid config file: {e}")))?;
        config
            .validate()
            .map_err(|e| PipelineError::Config(format!("config validation failed: {e}")))?;
        Ok(config)
    }
}
