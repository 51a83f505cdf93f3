//! Serial ZIP entry extraction
//!
//! Extraction is deliberately sequential and CPU/memory-bound; the
//! concurrency lives on the upload side (see `scheduler`). Encrypted
//! entries are tried against the configured default passphrase, and a
//! decryption failure is its own error kind so callers can prompt for
//! manual handling instead of retrying.

use crate::archive::safety::DeclaredEntry;
use crate::error::{PipelineError, Result};
use bytes::Bytes;
use std::io::{Cursor, Read};
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

/// An opened in-memory ZIP container.
#[derive(Debug)]
pub struct ArchiveReader {
    archive: ZipArchive<Cursor<Bytes>>,
    compressed_size: u64,
}

impl ArchiveReader {
    pub fn open(bytes: Bytes) -> Result<Self> {
        let compressed_size = bytes.len() as u64;
        let archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| PipelineError::archive(format!("failed to open archive: {e}")))?;
        Ok(Self {
            archive,
            compressed_size,
        })
    }

    /// Total size of the container itself (the denominator of the
    /// expansion ratio).
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    /// Enumerate declared entry metadata without decompressing anything.
    pub fn declared_entries(&mut self) -> Result<Vec<DeclaredEntry>> {
        let mut entries = Vec::with_capacity(self.archive.len());
        for i in 0..self.archive.len() {
            let entry = self.archive.by_index_raw(i).map_err(|e| {
                PipelineError::archive(format!("failed to enumerate entry {i}: {e}"))
            })?;
            entries.push(DeclaredEntry {
                name: entry.name().to_string(),
                uncompressed_size: entry.size(),
                is_directory: entry.is_dir(),
                is_encrypted: entry.encrypted(),
            });
        }
        Ok(entries)
    }

    /// Extract one entry into memory, trying `passphrase` when the entry is
    /// encrypted. Returns the entry name alongside its bytes.
    pub fn extract_entry(&mut self, index: usize, passphrase: &str) -> Result<(String, Bytes)> {
        let encrypted = {
            let raw = self.archive.by_index_raw(index).map_err(|e| {
                PipelineError::archive(format!("failed to access entry {index}: {e}"))
            })?;
            // Names escaping the archive root never get extracted.
            if raw.name().contains("..") {
                return Err(PipelineError::archive(format!(
                    "unsafe entry path: {}",
                    raw.name()
                )));
            }
            raw.encrypted()
        };

        let mut entry = if encrypted {
            match self.archive.by_index_decrypt(index, passphrase.as_bytes()) {
                Ok(entry) => entry,
                Err(ZipError::InvalidPassword) => {
                    return Err(PipelineError::ArchiveDecryptionFailed(format!(
                        "default passphrase rejected for entry {index}"
                    )))
                }
                Err(e) => {
                    return Err(PipelineError::archive(format!(
                        "failed to open encrypted entry {index}: {e}"
                    )))
                }
            }
        } else {
            self.archive.by_index(index).map_err(|e| {
                PipelineError::archive(format!("failed to open entry {index}: {e}"))
            })?
        };

        let name = entry.name().to_string();
        let mut buffer = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buffer)
            .map_err(|e| PipelineError::archive(format!("failed to inflate '{name}': {e}")))?;

        debug!(entry = %name, size = buffer.len(), "extracted archive entry");
        Ok((name, Bytes::from(buffer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(files: &[(&str, &[u8])]) -> Bytes {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = ZipWriter::new(&mut cursor);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
        Bytes::from(cursor.into_inner())
    }

    #[test]
    fn enumerates_without_extraction() {
        let zip = build_zip(&[
            ("one.rawdata", b"1,2,3\n".as_slice()),
            ("notes.txt", b"hello".as_slice()),
        ]);
        let mut reader = ArchiveReader::open(zip).unwrap();
        let entries = reader.declared_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "one.rawdata");
        assert_eq!(entries[0].uncompressed_size, 6);
        assert!(!entries[0].is_encrypted);
    }

    #[test]
    fn extracts_entry_content() {
        let zip = build_zip(&[("cap.rawdata", b"a,b\n1,2\n".as_slice())]);
        let mut reader = ArchiveReader::open(zip).unwrap();
        let (name, bytes) = reader.extract_entry(0, "unused").unwrap();
        assert_eq!(name, "cap.rawdata");
        assert_eq!(&bytes[..], b"a,b\n1,2\n");
    }

    #[test]
    fn rejects_path_traversal_names() {
        let zip = build_zip(&[("../../etc/passwd", b"oops".as_slice())]);
        let mut reader = ArchiveReader::open(zip).unwrap();
        let err = reader.extract_entry(0, "unused").unwrap_err();
        assert!(matches!(err, PipelineError::Archive(_)));
    }

    #[test]
    fn garbage_bytes_fail_to_open() {
        let err = ArchiveReader::open(Bytes::from_static(b"not a zip at all")).unwrap_err();
        assert!(matches!(err, PipelineError::Archive(_)));
    }

    #[test]
    fn wrong_passphrase_is_a_decryption_error() {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .with_aes_encryption(zip::AesMode::Aes256, "right-password");
        writer.start_file("secret.rawdata", options).unwrap();
        writer.write_all(b"classified\n").unwrap();
        writer.finish().unwrap();
        let zip = Bytes::from(cursor.into_inner());

        let mut reader = ArchiveReader::open(zip).unwrap();
        let entries = reader.declared_entries().unwrap();
        assert!(entries[0].is_encrypted);

        let err = reader.extract_entry(0, "wrong-password").unwrap_err();
        assert!(matches!(err, PipelineError::ArchiveDecryptionFailed(_)));
    }

    #[test]
    fn correct_passphrase_decrypts() {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .with_aes_encryption(zip::AesMode::Aes256, "sensor");
        writer.start_file("secret.rawdata", options).unwrap();
        writer.write_all(b"classified\n").unwrap();
        writer.finish().unwrap();
        let zip = Bytes::from(cursor.into_inner());

        let mut reader = ArchiveReader::open(zip).unwrap();
        let (_, bytes) = reader.extract_entry(0, "sensor").unwrap();
        assert_eq!(&bytes[..], b"classified\n");
    }
}
