//! 结构化日志初始化
//!
//! Host applications that embed the pipeline usually install their own
//! subscriber; this helper exists for standalone use and tests.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global `tracing` subscriber honouring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
