//! tracesrv - ingestion and trace-reconstruction core for a low-overhead
//! performance tracing system.
//!
//! Instrumented client processes emit a framed, optionally LZ4-compressed
//! event stream over TCP (or replay it from a saved trace file). This crate
//! decodes that stream, reconstructs a queryable trace model (per-thread
//! zone hierarchies, lock timelines, plot series, GPU contexts, messages,
//! frame marks, interned strings), and exposes it to a read-only query API
//! while ingestion continues concurrently on a dedicated thread.

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod filefmt;
pub mod interner;
pub mod model;
pub mod query;
pub mod wire;

pub use config::Config;
pub use controller::{Controller, ControllerState};
pub use error::{TraceError, TraceResult};
pub use model::Trace;

/// Protocol magic used on the wire handshake and in data frames.
/// Not to be confused with the trace-file magic (see [`filefmt::MAGIC`]).
pub const DEFAULT_LISTEN_PORT: u16 = 8086;

/// Sentinel returned by string lookups that have not resolved yet.
pub const UNRESOLVED_STRING: &str = "???";
