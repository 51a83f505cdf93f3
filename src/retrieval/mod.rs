//! 检索管道
//!
//! The symmetric half of ingest: fetch a compressed artifact by id (cache
//! first), decompress it progressively in bounded chunks, and present the
//! decoded lines through a virtual window with live search. Sessions are
//! keyed by artifact id — a repeated request for an id that is in flight or
//! already decoded attaches to the existing session's accumulated lines
//! rather than restarting the fetch or decode.

pub mod decoder;
pub mod fetcher;
pub mod session;
pub mod window;

pub use decoder::{DecodeSession, DecodeState, LineBatch, StreamingDecoder};
pub use fetcher::ArtifactFetcher;
pub use session::{DocumentSession, RetrievalService};
pub use window::{LineStore, SearchMatches, VirtualWindow};
