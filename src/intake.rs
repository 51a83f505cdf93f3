//! Intake validation
//!
//! Cheap heuristic classification of a candidate file before the pipeline
//! commits hashing/compression resources to it. Pure function of the first
//! kilobyte: no network, no disk. This is a heuristic, not a guarantee —
//! false negatives are acceptable, false positives must be rare.

use tracing::debug;

/// Bytes inspected for magic numbers.
pub const MAGIC_SAMPLE_LEN: usize = 1024;
/// Bytes sampled for the null-byte ratio check.
const NULL_SAMPLE_LEN: usize = 500;
/// Reject when more than this fraction of the sample is NUL.
const NULL_RATIO_LIMIT: f64 = 0.10;

/// Known binary-document signatures that signal "wrong file uploaded"
/// rather than a malformed capture.
const BINARY_MAGICS: &[(&[u8], &str)] = &[
    (b"%PDF", "PDF document"),
    (b"\x89PNG", "PNG image"),
    (b"GIF8", "GIF image"),
    (b"\x7fELF", "ELF binary"),
    (b"\xff\xd8\xff", "JPEG image"),
];

/// Validator decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeDecision {
    Accept,
    Reject(String),
}

impl IntakeDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Classify the leading bytes of a candidate capture file.
///
/// Rules, in order: (a) reject on a known binary-document magic number;
/// (b) reject when the NUL ratio of the first 500 bytes exceeds 10%,
/// which signals binary content instead of delimited text.
pub fn validate_prefix(prefix: &[u8]) -> IntakeDecision {
    let head = &prefix[..prefix.len().min(MAGIC_SAMPLE_LEN)];

    for (magic, description) in BINARY_MAGICS {
        if head.starts_with(magic) {
            debug!(format = description, "intake rejected on magic bytes");
            return IntakeDecision::Reject(format!(
                "file looks like a {description}, not a capture file"
            ));
        }
    }

    let sample = &head[..head.len().min(NULL_SAMPLE_LEN)];
    if !sample.is_empty() {
        let nulls = sample.iter().filter(|&&b| b == 0).count();
        let ratio = nulls as f64 / sample.len() as f64;
        if ratio > NULL_RATIO_LIMIT {
            debug!(null_ratio = ratio, "intake rejected on null-byte ratio");
            return IntakeDecision::Reject(format!(
                "binary content detected ({:.0}% null bytes in sample)",
                ratio * 100.0
            ));
        }
    }

    IntakeDecision::Accept
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn accepts_plain_text() {
        let decision = validate_prefix(b"ts,ax,ay,az\n0,0.01,0.02,9.81\n");
        assert!(decision.is_accept());
    }

    #[rstest]
    #[case::pdf(b"%PDF-1.7 rest of header".as_slice())]
    #[case::png(b"\x89PNG\r\n\x1a\n".as_slice())]
    #[case::elf(b"\x7fELF\x02\x01\x01".as_slice())]
    #[case::jpeg(b"\xff\xd8\xff\xe0".as_slice())]
    fn rejects_binary_documents(#[case] prefix: &[u8]) {
        assert!(matches!(validate_prefix(prefix), IntakeDecision::Reject(_)));
    }

    #[test]
    fn rejects_high_null_ratio() {
        // 100 of 500 sampled bytes are NUL: 20% > 10%.
        let mut data = vec![b'a'; 500];
        for b in data.iter_mut().take(100) {
            *b = 0;
        }
        assert!(matches!(validate_prefix(&data), IntakeDecision::Reject(_)));
    }

    #[test]
    fn tolerates_sparse_nulls() {
        // 20 of 500 is 4%, under the limit.
        let mut data = vec![b'a'; 500];
        for b in data.iter_mut().take(20) {
            *b = 0;
        }
        assert!(validate_prefix(&data).is_accept());
    }

    #[test]
    fn empty_input_is_accepted() {
        // Nothing to judge; downstream stages handle empty files.
        assert!(validate_prefix(b"").is_accept());
    }

    #[test]
    fn short_sample_uses_available_bytes() {
        // 3 NULs in a 10-byte file is 30% of the actual sample.
        let data = [b'a', 0, 0, 0, b'b', b'c', b'd', b'e', b'f', b'g'];
        assert!(matches!(validate_prefix(&data), IntakeDecision::Reject(_)));
    }
}
