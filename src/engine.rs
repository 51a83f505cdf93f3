//! Fingerprint-compress engine
//!
//! A single streaming pass over the input simultaneously folds every byte
//! into the MD5 content fingerprint and windows it into fixed-size
//! uncompressed frames, each compressed as an independent zstd frame. The
//! frame index records where each frame landed in the compressed output, so
//! later consumers can decompress partially or seek.
//!
//! The input may be too large to buffer twice, and re-reading a client
//! stream is costly, hence the one-pass contract: the fingerprint is never
//! recomputed and never approximated. If the underlying stream errors
//! mid-read the whole operation fails atomically — no partial fingerprint
//! or compressed output escapes.

use crate::error::{PipelineError, Result};
use crate::model::{CompressedArtifact, ContentFingerprint, FrameEntry, FrameIndex};
use bytes::Bytes;
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Read granularity of the streaming pass. Independent of the frame size;
/// several reads typically fill one frame.
const READ_CHUNK: usize = 64 * 1024;

/// Run the one-pass fingerprint+compress over `reader`.
///
/// `frame_size` is the uncompressed window per frame; `level` is the zstd
/// compression level. `on_progress` receives cumulative uncompressed bytes
/// consumed, after every read.
pub async fn compress_stream<R>(
    mut reader: R,
    level: i32,
    frame_size: usize,
    mut on_progress: impl FnMut(u64),
) -> Result<CompressedArtifact>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Md5::new();
    let mut window: Vec<u8> = Vec::with_capacity(frame_size);
    let mut compressed: Vec<u8> = Vec::new();
    let mut frame_index = FrameIndex::default();
    let mut total_read: u64 = 0;
    let mut read_buf = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut read_buf).await?;
        if n == 0 {
            break;
        }
        let chunk = &read_buf[..n];
        hasher.update(chunk);
        window.extend_from_slice(chunk);
        total_read += n as u64;
        on_progress(total_read);

        while window.len() >= frame_size {
            let rest = window.split_off(frame_size);
            let base = frame_index.uncompressed_size();
            flush_frame(&window, level, base, &mut compressed, &mut frame_index)?;
            window = rest;
        }

        // Keep the pass cooperative on large inputs.
        tokio::task::yield_now().await;
    }

    if !window.is_empty() {
        let base = frame_index.uncompressed_size();
        flush_frame(&window, level, base, &mut compressed, &mut frame_index)?;
    }

    let digest = hasher.finalize();
    let fingerprint = ContentFingerprint(digest.into());

    debug!(
        original_size = total_read,
        compressed_size = compressed.len(),
        frames = frame_index.frame_count(),
        fingerprint = %fingerprint,
        "fingerprint-compress pass complete"
    );

    Ok(CompressedArtifact {
        fingerprint,
        compressed_bytes: Bytes::from(compressed),
        frame_index,
        original_size: total_read,
    })
}

/// Convenience wrapper for already-materialised buffers (archive entries).
pub async fn compress_bytes(
    data: &[u8],
    level: i32,
    frame_size: usize,
    on_progress: impl FnMut(u64),
) -> Result<CompressedArtifact> {
    compress_stream(data, level, frame_size, on_progress).await
}

/// Compress one uncompressed window into an independent zstd frame and
/// append its entry to the index.
fn flush_frame(
    window: &[u8],
    level: i32,
    cumulative_base: u64,
    compressed: &mut Vec<u8>,
    frame_index: &mut FrameIndex,
) -> Result<()> {
    let frame_offset = compressed.len() as u64;
    let frame = zstd::bulk::compress(window, level)
        .map_err(|e| PipelineError::archive(format!("zstd frame compression failed: {e}")))?;
    compressed.extend_from_slice(&frame);
    frame_index.push(FrameEntry {
        frame_offset,
        frame_compressed_length: frame.len() as u64,
        cumulative_uncompressed_length: cumulative_base + window.len() as u64,
    });
    Ok(())
}
