//! Core engine for the zbx-rtx real-time event bridge: a multi-file NDJSON
//! tail engine feeding a bounded in-memory ring buffer and an SSE fan-out
//! hub. See the crate's sibling `zbx-rtx-server` for the HTTP adapter that
//! wires these together.

pub mod envelope;
pub mod error;
pub mod family;
pub mod hub;
pub mod ring;
pub mod tail;

pub use envelope::{Envelope, PendingEnvelope, Source};
pub use error::CoreError;
pub use family::Family;
pub use hub::{ClientHandle, ClientId, SseHub};
pub use ring::{Query, RingBuffer};
pub use tail::{DirectoryTailer, DirectoryTailerConfig, DirEvent, FileEvent, FileTailer, FileTailerHandle};
