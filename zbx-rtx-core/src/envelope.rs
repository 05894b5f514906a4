//! The unit stored in the ring buffer and broadcast to SSE clients.

use crate::family::Family;
use serde::{Deserialize, Serialize};

/// Identifies the file an envelope's record was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub file: String,
    pub family: Family,
}

/// An envelope before it has been assigned an id and insertion time by the
/// ring buffer. Constructed by the orchestration layer from a tail engine
/// `data` event.
#[derive(Debug, Clone)]
pub struct PendingEnvelope {
    pub source: Source,
    /// The raw NDJSON line, forwarded opaquely. The core never interprets
    /// its contents; it is carried as a dynamic JSON value purely so it
    /// serializes verbatim into snapshot/SSE responses (see spec §9 design
    /// notes). Lines that are not valid JSON are carried as a JSON string
    /// of the raw text instead of being rejected.
    pub record: serde_json::Value,
}

impl PendingEnvelope {
    pub fn new(file: impl Into<String>, family: Family, raw_line: &str) -> Self {
        let record = serde_json::from_str(raw_line)
            .unwrap_or_else(|_| serde_json::Value::String(raw_line.to_string()));
        Self {
            source: Source {
                file: file.into(),
                family,
            },
            record,
        }
    }
}

/// A fully assigned envelope, as stored in the ring and broadcast to
/// clients. `id` is strictly increasing and never reused; `time` is the
/// millisecond wall-clock timestamp at ring insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub time: i64,
    pub source: Source,
    pub record: serde_json::Value,
}
