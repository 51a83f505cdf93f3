//! Archive safety analysis
//!
//! Enumerates archive entries without extracting anything and scores the
//! archive's expansion risk from the *declared* uncompressed sizes. A
//! rejection here aborts the whole archive before a single entry is
//! inflated, which is the only place a zip bomb can be stopped cheaply.

use crate::config::SafetyPolicy;
use crate::model::{ArchiveEntryInfo, SafetyReport, SafetyVerdict};
use tracing::{info, warn};

/// Declared metadata of one entry, as reported by the container format.
#[derive(Debug, Clone)]
pub struct DeclaredEntry {
    pub name: String,
    pub uncompressed_size: u64,
    pub is_directory: bool,
    pub is_encrypted: bool,
}

/// Safety analyzer over declared entry metadata.
pub struct SafetyAnalyzer {
    policy: SafetyPolicy,
    target_extension: String,
}

impl SafetyAnalyzer {
    pub fn new(policy: SafetyPolicy, target_extension: impl Into<String>) -> Self {
        Self {
            policy,
            target_extension: target_extension.into(),
        }
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    /// Score an archive from its declared entries.
    ///
    /// `archive_compressed_size` is floored at 1 to avoid division by zero.
    /// The size ceiling applies unconditionally; the ratio ceiling only
    /// fires above the configured size floor, so small, legitimately
    /// compressible text archives pass.
    pub fn analyze(
        &self,
        entries: &[DeclaredEntry],
        archive_compressed_size: u64,
    ) -> SafetyReport {
        let mut total_uncompressed: u64 = 0;
        let mut infos = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.is_directory {
                continue;
            }
            total_uncompressed = total_uncompressed.saturating_add(entry.uncompressed_size);
            infos.push(ArchiveEntryInfo {
                name: entry.name.clone(),
                size: entry.uncompressed_size,
                is_target_type: self.is_target(&entry.name),
                is_encrypted: entry.is_encrypted,
            });
        }

        let ratio = total_uncompressed as f64 / archive_compressed_size.max(1) as f64;

        let verdict = if total_uncompressed > self.policy.max_total_uncompressed {
            warn!(
                total_uncompressed,
                limit = self.policy.max_total_uncompressed,
                "archive rejected: declared size exceeds ceiling"
            );
            SafetyVerdict::Rejected("size".to_string())
        } else if ratio > self.policy.max_ratio && total_uncompressed > self.policy.ratio_size_floor
        {
            warn!(
                ratio,
                limit = self.policy.max_ratio,
                total_uncompressed,
                "archive rejected: expansion ratio exceeds ceiling"
            );
            SafetyVerdict::Rejected("ratio".to_string())
        } else {
            info!(
                entries = infos.len(),
                total_uncompressed, ratio, "archive passed safety analysis"
            );
            SafetyVerdict::Safe
        };

        SafetyReport {
            total_uncompressed_estimate: total_uncompressed,
            ratio,
            entries: infos,
            verdict,
        }
    }

    fn is_target(&self, name: &str) -> bool {
        std::path::Path::new(name)
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.target_extension))
            .unwrap_or(false)
    }
}
