//! 归档处理模块
//!
//! ZIP-container handling for the ingest pipeline: pre-extraction safety
//! analysis against declared entry sizes, and serial entry extraction with
//! default-passphrase decryption of protected entries.

pub mod extract;
pub mod safety;

pub use extract::ArchiveReader;
pub use safety::SafetyAnalyzer;
