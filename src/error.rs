//! Crate-wide error types.
//!
//! Grounded on the teacher's `ProtocolError` (examples/dawsh2-AlphaPulse/backend/protocol_v2/src/lib.rs)
//! and `ParseError` (.../tlv/mod.rs): a `thiserror`-derived enum with one
//! variant per row of the error table, transient conditions kept out of it
//! entirely and represented as ordinary values instead.

use thiserror::Error;

/// Errors that can terminate ingestion or trace-file construction.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LZ4 decode failed: {0}")]
    Lz4Decode(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("unsupported trace file version: {version}")]
    UnsupportedVersion { version: u8 },

    #[error("not a trace dump (bad magic)")]
    NotTracyDump,
}

pub type TraceResult<T> = std::result::Result<T, TraceError>;
