use miette::Diagnostic;
use thiserror::Error;

/**
 * 管道错误类型 - 使用 miette 提供用户友好的错误诊断
 *
 * Every failure class the pipeline can surface is a distinct variant so the
 * UI layer can react differently (retry, prompt for password, show a badge)
 * instead of collapsing everything into one generic error.
 */
#[derive(Error, Debug, Diagnostic)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    #[diagnostic(code(ingest::io_error))]
    Io(#[from] std::io::Error),

    /// Intake validator rejection: the bytes do not look like a capture file.
    #[error("Unsupported format: {0}")]
    #[diagnostic(
        code(ingest::unsupported_format),
        help("Only delimited-text .rawdata captures (or a .zip of them) are accepted")
    )]
    UnsupportedFormat(String),

    /// Safety analyzer rejection. `metric` is "size" or "ratio" so the caller
    /// can name the threshold that fired.
    #[error("Archive rejected ({metric}): {message}")]
    #[diagnostic(
        code(ingest::archive_bomb),
        help("The archive's declared uncompressed size or expansion ratio exceeds the configured safety limits")
    )]
    ArchiveBomb { metric: &'static str, message: String },

    /// Distinct from a generic extraction failure: the user action is
    /// "provide the password manually", not "retry".
    #[error("Archive entry decryption failed: {0}")]
    #[diagnostic(
        code(ingest::archive_decryption_failed),
        help("The configured default passphrase did not open this entry")
    )]
    ArchiveDecryptionFailed(String),

    #[error("Archive error: {0}")]
    #[diagnostic(
        code(ingest::archive_error),
        help("Ensure the archive file is not corrupted and is a supported format")
    )]
    Archive(String),

    /// Network/server failure during upload or fetch. Retryable.
    #[error("Transport failure: {0}")]
    #[diagnostic(
        code(ingest::transport_failure),
        help("Check the storage backend is reachable, then retry")
    )]
    Transport(String),

    /// Phase-1 dedup probe failure. Never surfaced to the user; the pipeline
    /// logs it and falls through to phase 2.
    #[error("Dedup probe failure: {0}")]
    #[diagnostic(code(ingest::dedup_probe_failure))]
    DedupProbe(String),

    /// Phase-2 (authoritative) dedup failure. Propagates to the caller.
    #[error("Dedup check failed: {0}")]
    #[diagnostic(code(ingest::dedup_failure))]
    Dedup(String),

    /// Malformed/truncated compressed stream or non-text content.
    /// Not retryable without a re-fetch.
    #[error("Decode failure: {0}")]
    #[diagnostic(
        code(ingest::decode_failure),
        help("The compressed artifact is truncated, corrupted, or not UTF-8 text")
    )]
    Decode(String),

    /// Retrieval request cancelled mid-stream (navigation away, view reuse).
    #[error("Operation cancelled")]
    #[diagnostic(code(ingest::cancelled))]
    Cancelled,

    #[error("Configuration error: {0}")]
    #[diagnostic(code(ingest::config_error))]
    Config(String),
}

impl PipelineError {
    pub fn archive<S: Into<String>>(message: S) -> Self {
        Self::Archive(message.into())
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode(message.into())
    }

    /// True when the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::DedupProbe(_))
    }
}

/// 统一的 Result 类型
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_retryable() {
        assert!(PipelineError::transport("connection reset").is_retryable());
        assert!(!PipelineError::decode("bad frame").is_retryable());
        assert!(!PipelineError::Cancelled.is_retryable());
    }

    #[test]
    fn bomb_error_names_metric() {
        let err = PipelineError::ArchiveBomb {
            metric: "ratio",
            message: "expansion ratio 300.0 exceeds 200.0".into(),
        };
        let text = err.to_string();
        assert!(text.contains("ratio"));
    }
}
