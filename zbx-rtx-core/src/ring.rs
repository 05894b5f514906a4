//! Bounded in-memory log of the most recent envelopes, keyed by a
//! monotonically increasing id.

use crate::envelope::{Envelope, PendingEnvelope};
use crate::error::CoreError;
use crate::family::Family;
use parking_lot::Mutex;

/// Default query page size when the caller doesn't specify `limit`.
pub const DEFAULT_QUERY_LIMIT: usize = 100;
/// Hard ceiling on a single query's result size.
pub const MAX_QUERY_LIMIT: usize = 10_000;

#[derive(Debug, Default, Clone)]
pub struct Query {
    pub family: Option<Family>,
    pub limit: Option<usize>,
    pub since_id: Option<u64>,
}

impl Query {
    fn resolved_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT)
    }

    fn resolved_since_id(&self) -> u64 {
        self.since_id.unwrap_or(0)
    }
}

struct Inner {
    slots: Vec<Option<Envelope>>,
    capacity: usize,
    write_cursor: usize,
    count: usize,
    next_id: u64,
}

/// A fixed-capacity ring of [`Envelope`]s. Construction fails (in the
/// orchestration layer, see `RingBuffer::new`) only at process start if
/// `capacity` is zero — that is a startup misconfiguration, not a runtime
/// error (spec §7).
pub struct RingBuffer {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RingBuffer")
            .field("capacity", &inner.capacity)
            .field("count", &inner.count)
            .field("next_id", &inner.next_id)
            .finish()
    }
}

impl RingBuffer {
    /// Fails only if `capacity` is zero — a startup misconfiguration
    /// (spec §7), not a runtime error. The caller is expected to log and
    /// exit the process rather than retry.
    pub fn new(capacity: usize) -> Result<Self, CoreError> {
        if capacity == 0 {
            return Err(CoreError::InvalidRingCapacity);
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                slots: vec![None; capacity],
                capacity,
                write_cursor: 0,
                count: 0,
                next_id: 1,
            }),
        })
    }

    /// Assigns the next id, stamps `time`, stores the envelope at the
    /// write cursor, and advances it modulo capacity. Constant time.
    pub fn push(&self, pending: PendingEnvelope, now_millis: i64) -> Envelope {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        let envelope = Envelope {
            id,
            time: now_millis,
            source: pending.source,
            record: pending.record,
        };

        let cursor = inner.write_cursor;
        inner.slots[cursor] = Some(envelope.clone());
        inner.write_cursor = (cursor + 1) % inner.capacity;
        inner.count = (inner.count + 1).min(inner.capacity);

        envelope
    }

    /// Highest assigned id, or 0 before the first push.
    pub fn latest_id(&self) -> u64 {
        let inner = self.inner.lock();
        inner.next_id - 1
    }

    /// Ascending-id envelopes satisfying the query, walking from the
    /// oldest resident slot toward the newest and stopping at `limit`.
    /// Envelopes already evicted by capacity pressure are silently
    /// omitted; replay is best-effort.
    pub fn query(&self, query: Query) -> Vec<Envelope> {
        let since_id = query.resolved_since_id();
        let limit = query.resolved_limit();

        let inner = self.inner.lock();
        let start = if inner.count < inner.capacity {
            0
        } else {
            inner.write_cursor
        };

        let mut out = Vec::with_capacity(limit.min(inner.count));
        for offset in 0..inner.count {
            if out.len() >= limit {
                break;
            }
            let idx = (start + offset) % inner.capacity;
            let Some(envelope) = inner.slots[idx].as_ref() else {
                continue;
            };
            if envelope.id <= since_id {
                continue;
            }
            if let Some(family) = query.family {
                if envelope.source.family != family {
                    continue;
                }
            }
            out.push(envelope.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(family: Family, line: &str) -> PendingEnvelope {
        PendingEnvelope::new("problems-x.ndjson", family, line)
    }

    #[test]
    fn ids_are_contiguous_from_one() {
        let ring = RingBuffer::new(4).unwrap();
        for i in 0..3 {
            let env = ring.push(pending(Family::Problems, "{}"), 0);
            assert_eq!(env.id, i + 1);
        }
        assert_eq!(ring.latest_id(), 3);
    }

    #[test]
    fn retains_only_last_capacity_after_wraparound() {
        let ring = RingBuffer::new(3).unwrap();
        for _ in 0..10 {
            ring.push(pending(Family::Other, "{}"), 0);
        }
        assert_eq!(ring.latest_id(), 10);
        let all = ring.query(Query::default());
        let ids: Vec<u64> = all.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![8, 9, 10]);
    }

    #[test]
    fn query_filters_by_since_id_and_family_and_is_ascending() {
        let ring = RingBuffer::new(10).unwrap();
        for i in 0..5 {
            let family = if i % 2 == 0 { Family::Problems } else { Family::History };
            ring.push(pending(family, "{}"), 0);
        }
        let results = ring.query(Query {
            family: Some(Family::Problems),
            since_id: Some(1),
            limit: None,
        });
        let ids: Vec<u64> = results.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 5]);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn query_limit_is_clamped_and_truncates() {
        let ring = RingBuffer::new(200).unwrap();
        for _ in 0..150 {
            ring.push(pending(Family::Other, "{}"), 0);
        }
        // An absurdly large requested limit clamps to MAX_QUERY_LIMIT, but
        // only 150 envelopes are resident so all of them come back.
        let results = ring.query(Query {
            family: None,
            since_id: None,
            limit: Some(100_000),
        });
        assert_eq!(results.len(), 150);

        // A small limit truncates the walk.
        let results = ring.query(Query {
            family: None,
            since_id: None,
            limit: Some(10),
        });
        assert_eq!(results.len(), 10);
    }
}
