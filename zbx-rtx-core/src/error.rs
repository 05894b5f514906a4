//! Typed error kinds the core surfaces to its caller. Per-file and
//! per-scan I/O failures (spec §7) are not modeled here: they are
//! recovered from internally and surfaced as `Warn`/`Info` tail events,
//! never as a `Result::Err`. Only startup misconfiguration — which is
//! fatal by spec — is a real error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("ring buffer capacity must be greater than zero")]
    InvalidRingCapacity,
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
