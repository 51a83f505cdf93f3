//! Streaming decompression
//!
//! Consumes compressed bytes incrementally — straight from the network or
//! as fixed re-chunked slices of a cached blob — and emits decoded text in
//! line batches, so a multi-hundred-megabyte document never materialises as
//! one string. The accumulator only ever holds the lines of the current
//! batch plus one trailing partial line, bounding peak memory independent
//! of document length.
//!
//! State machine: `Idle → Streaming → {Complete | Aborted | Errored}`.
//! Decoders are per-request; aborting one session cannot disturb another.

use crate::config::RetrievalConfig;
use crate::error::{PipelineError, Result};
use async_compression::tokio::bufread::ZstdDecoder;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Decode session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Idle,
    Streaming,
    Complete,
    Aborted,
    Errored,
}

/// A flushed batch of complete lines. `is_final` marks the end-of-stream
/// flush, whose last line may lack a trailing newline.
#[derive(Debug, Clone)]
pub struct LineBatch {
    pub lines: Vec<String>,
    pub is_final: bool,
}

/// Decoder configuration shared by all sessions.
#[derive(Debug, Clone)]
pub struct StreamingDecoder {
    chunk_size: usize,
    line_batch_size: usize,
}

impl StreamingDecoder {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            line_batch_size: config.line_batch_size,
        }
    }

    /// Re-chunk a cached compressed blob so decoding it does not occupy the
    /// executor in one long step.
    pub fn rechunk(&self, blob: Bytes) -> BoxStream<'static, Result<Bytes>> {
        let chunk_size = self.chunk_size;
        futures::stream::iter(
            (0..blob.len())
                .step_by(chunk_size.max(1))
                .map(move |start| {
                    let end = (start + chunk_size).min(blob.len());
                    Ok(blob.slice(start..end))
                })
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    /// Start a decode session over a compressed byte stream. Line batches
    /// arrive on the returned receiver; the session handle carries the
    /// observable state and the abort switch.
    pub fn start(
        &self,
        compressed: BoxStream<'static, Result<Bytes>>,
        cancel: CancellationToken,
    ) -> (DecodeSession, mpsc::Receiver<LineBatch>) {
        let (batch_tx, batch_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(DecodeState::Idle);
        let line_batch_size = self.line_batch_size;
        let session_cancel = cancel.clone();

        let worker = tokio::spawn(async move {
            let _ = state_tx.send(DecodeState::Streaming);
            match run_decode(compressed, line_batch_size, &cancel, &batch_tx).await {
                Ok(total_lines) => {
                    debug!(total_lines, "decode session complete");
                    let _ = state_tx.send(DecodeState::Complete);
                }
                Err(PipelineError::Cancelled) => {
                    debug!("decode session aborted");
                    let _ = state_tx.send(DecodeState::Aborted);
                }
                Err(e) => {
                    warn!(error = %e, "decode session failed");
                    let _ = state_tx.send(DecodeState::Errored);
                }
            }
        });

        (
            DecodeSession {
                state: state_rx,
                cancel: session_cancel,
                worker,
            },
            batch_rx,
        )
    }
}

/// Handle to one in-flight decode.
pub struct DecodeSession {
    state: watch::Receiver<DecodeState>,
    cancel: CancellationToken,
    worker: tokio::task::JoinHandle<()>,
}

impl DecodeSession {
    pub fn state(&self) -> DecodeState {
        *self.state.borrow()
    }

    /// Abort the in-flight decode. Partial renderer state for this session
    /// is the consumer's to discard; other sessions are untouched.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session to reach a terminal state.
    pub async fn finished(mut self) -> DecodeState {
        let _ = self.worker.await;
        let _ = self.state.changed().await;
        *self.state.borrow()
    }
}

async fn run_decode(
    compressed: BoxStream<'static, Result<Bytes>>,
    line_batch_size: usize,
    cancel: &CancellationToken,
    batches: &mpsc::Sender<LineBatch>,
) -> Result<u64> {
    let io_stream = compressed.map(|item| {
        item.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    });
    let mut decoder = ZstdDecoder::new(StreamReader::new(io_stream));
    // The engine writes independently-flushed frames; accept them all.
    decoder.multiple_members(true);

    let mut accumulator: Vec<u8> = Vec::new();
    let mut pending_newlines = 0usize;
    let mut total_lines = 0u64;
    let mut read_buf = vec![0u8; 64 * 1024];

    loop {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let n = decoder
            .read(&mut read_buf)
            .await
            .map_err(|e| PipelineError::decode(format!("zstd stream error: {e}")))?;
        if n == 0 {
            break;
        }

        let chunk = &read_buf[..n];
        pending_newlines += chunk.iter().filter(|&&b| b == b'\n').count();
        accumulator.extend_from_slice(chunk);

        if pending_newlines >= line_batch_size {
            let lines = take_complete_lines(&mut accumulator)?;
            pending_newlines = 0;
            total_lines += lines.len() as u64;
            if batches
                .send(LineBatch {
                    lines,
                    is_final: false,
                })
                .await
                .is_err()
            {
                // Consumer went away; treat as an abort.
                return Err(PipelineError::Cancelled);
            }
        }

        // Explicit yield between chunks keeps the host responsive while a
        // large blob decodes.
        tokio::task::yield_now().await;
    }

    let final_lines = drain_remaining(&mut accumulator)?;
    total_lines += final_lines.len() as u64;
    let _ = batches
        .send(LineBatch {
            lines: final_lines,
            is_final: true,
        })
        .await;

    Ok(total_lines)
}

/// Split off everything up to and including the last newline; the trailing
/// partial line stays behind as the new accumulator seed.
fn take_complete_lines(accumulator: &mut Vec<u8>) -> Result<Vec<String>> {
    let Some(last_newline) = accumulator.iter().rposition(|&b| b == b'\n') else {
        return Ok(Vec::new());
    };
    let remainder = accumulator.split_off(last_newline + 1);
    let completed = std::mem::replace(accumulator, remainder);
    lines_from_bytes(&completed, true)
}

fn drain_remaining(accumulator: &mut Vec<u8>) -> Result<Vec<String>> {
    let bytes = std::mem::take(accumulator);
    lines_from_bytes(&bytes, false)
}

fn lines_from_bytes(bytes: &[u8], ends_with_newline: bool) -> Result<Vec<String>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|e| PipelineError::decode(format!("non-text content: {e}")))?;
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    if ends_with_newline {
        // split leaves one empty string after the final newline.
        lines.pop();
    } else if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    Ok(lines)
}
