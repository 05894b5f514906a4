//! Registry of connected live clients with per-client backpressure-aware
//! dropping and periodic heartbeats.
//!
//! Grounded on the teacher's `ConnectionManager`
//! (`infra/websocket/manager.rs`: a `DashMap` of per-client senders plus a
//! broadcast helper) and `MediaEventBus` (`infra/scan/media_event_bus.rs`:
//! a sequence counter driving fan-out to subscribers), adapted from
//! WebSocket rooms / an unbounded `tokio::broadcast` channel to SSE frames
//! with an explicit per-client byte budget, since the spec requires
//! per-sink backpressure the stock `broadcast` channel (which drops by
//! *lag count*, not by *pending bytes*) cannot express.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

pub const DEFAULT_HEARTBEAT_MS: u64 = 20_000;
pub const DEFAULT_DROP_THRESHOLD: usize = 65_536;

/// Bound on each client's outbound frame queue. Frames within this many
/// slots but under the byte threshold still queue normally; a full queue
/// is treated the same as a sink write failure for that one frame.
const CLIENT_CHANNEL_CAPACITY: usize = 1024;

pub type ClientId = Uuid;

struct ClientSlot {
    tx: mpsc::Sender<Bytes>,
    pending: Arc<AtomicUsize>,
}

/// Handle returned by [`SseHub::register`]. The HTTP adapter reads frames
/// from `rx` and must call [`ClientHandle::ack`] after each one is
/// actually written to the wire, releasing its backpressure credit.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    pub rx: mpsc::Receiver<Bytes>,
    pending: Arc<AtomicUsize>,
}

impl ClientHandle {
    pub fn ack(&self, frame_len: usize) {
        self.pending.fetch_sub(frame_len, Ordering::AcqRel);
    }
}

pub struct SseHub {
    clients: Arc<DashMap<ClientId, ClientSlot>>,
    drop_threshold: usize,
    heartbeat_ms: u64,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SseHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseHub")
            .field("clients", &self.clients.len())
            .field("drop_threshold", &self.drop_threshold)
            .finish()
    }
}

impl SseHub {
    pub fn new(drop_threshold: usize, heartbeat_ms: u64) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            drop_threshold,
            heartbeat_ms,
            heartbeat_task: Mutex::new(None),
        }
    }

    /// Registers a new client sink and returns its receive half.
    pub fn register(&self) -> ClientHandle {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        let pending = Arc::new(AtomicUsize::new(0));
        self.clients.insert(
            id,
            ClientSlot {
                tx,
                pending: Arc::clone(&pending),
            },
        );
        ClientHandle { id, rx, pending }
    }

    pub fn unregister(&self, id: ClientId) {
        self.clients.remove(&id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Writes one framed record to every currently registered sink, per
    /// spec §4.4's wire format:
    ///
    /// ```text
    /// id: <id>\n           (only if id is provided)
    /// event: <eventName>\n (only if non-empty)
    /// data: <payload>\n\n
    /// ```
    pub fn broadcast(&self, event_name: &str, payload: &serde_json::Value, id: Option<u64>) {
        let mut frame = String::new();
        if let Some(id) = id {
            frame.push_str(&format!("id: {id}\n"));
        }
        if !event_name.is_empty() {
            frame.push_str(&format!("event: {event_name}\n"));
        }
        frame.push_str(&format!("data: {payload}\n\n"));
        self.broadcast_raw(Bytes::from(frame.into_bytes()));
    }

    fn broadcast_raw(&self, frame: Bytes) {
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            let id = *entry.key();
            let slot = entry.value();

            if slot.pending.load(Ordering::Acquire) >= self.drop_threshold {
                // Backpressure breach: drop this frame for this sink only,
                // rely on ring-buffer replay via sinceId for recovery.
                continue;
            }

            let len = frame.len();
            slot.pending.fetch_add(len, Ordering::AcqRel);
            match slot.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Channel full is backpressure, not a dead client: drop
                    // this frame for this sink only (spec §4.4/§7).
                    slot.pending.fetch_sub(len, Ordering::AcqRel);
                }
                Err(TrySendError::Closed(_)) => {
                    slot.pending.fetch_sub(len, Ordering::AcqRel);
                    dead.push(id);
                }
            }
        }
        for id in dead {
            self.clients.remove(&id);
        }
    }

    pub fn heartbeat_start(self: &Arc<Self>) {
        let mut guard = self.heartbeat_task.lock();
        if guard.is_some() {
            return;
        }
        let hub = Arc::clone(self);
        let period = Duration::from_millis(hub.heartbeat_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                let millis = chrono::Utc::now().timestamp_millis();
                hub.broadcast_raw(Bytes::from(format!(": hb {millis}\n\n").into_bytes()));
            }
        });
        *guard = Some(handle);
    }

    pub fn heartbeat_stop(&self) {
        if let Some(handle) = self.heartbeat_task.lock().take() {
            handle.abort();
        }
    }

    /// Stops the heartbeat, gracefully ends every sink by dropping its
    /// sender (the consumer's stream observes channel closure and ends),
    /// and clears the registry.
    pub fn close(&self) {
        self.heartbeat_stop();
        self.clients.clear();
        warn!("sse hub closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn broadcast_delivers_framed_event_to_registered_client() {
        let hub = SseHub::new(DEFAULT_DROP_THRESHOLD, DEFAULT_HEARTBEAT_MS);
        let mut client = hub.register();
        hub.broadcast("zabbix.problems", &json!({"a": 1}), Some(1));

        let frame = client.rx.recv().await.unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert_eq!(text, "id: 1\nevent: zabbix.problems\ndata: {\"a\":1}\n\n");
        client.ack(frame.len());
    }

    #[tokio::test]
    async fn slow_client_drops_frames_while_fast_client_keeps_up() {
        let hub = Arc::new(SseHub::new(32, DEFAULT_HEARTBEAT_MS));
        let slow = hub.register();
        let mut fast = hub.register();

        // The fast client drains and acks every frame as it arrives, so its
        // `pending` count never crosses the drop threshold. The slow client
        // never reads, so its `pending` grows until frames start dropping.
        let fast_task = tokio::spawn(async move {
            let mut count = 0usize;
            while count < 1000 {
                let frame = fast.rx.recv().await.expect("fast client channel closed early");
                fast.ack(frame.len());
                count += 1;
            }
            count
        });

        for i in 0..1000u64 {
            hub.broadcast("zabbix.other", &json!({"i": i}), Some(i + 1));
            tokio::task::yield_now().await;
        }

        let fast_count = fast_task.await.unwrap();
        let mut slow_count = 0;
        let mut slow_rx = slow.rx;
        while slow_rx.try_recv().is_ok() {
            slow_count += 1;
        }

        assert!(slow_count < 1000, "slow client should have dropped frames");
        assert_eq!(fast_count, 1000, "a client that keeps up sees everything");
    }

    #[tokio::test]
    async fn unregister_removes_client() {
        let hub = SseHub::new(DEFAULT_DROP_THRESHOLD, DEFAULT_HEARTBEAT_MS);
        let client = hub.register();
        assert_eq!(hub.client_count(), 1);
        hub.unregister(client.id);
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn full_channel_drops_frame_but_keeps_client_connected() {
        // A high drop threshold means `pending` bytes alone never trip the
        // backpressure check, but the bounded mpsc channel (1024 slots)
        // still fills if the client never drains it. That must surface as
        // a dropped frame, not a disconnect.
        let hub = SseHub::new(usize::MAX, DEFAULT_HEARTBEAT_MS);
        let client = hub.register();
        for i in 0..(CLIENT_CHANNEL_CAPACITY as u64 + 10) {
            hub.broadcast("zabbix.other", &json!({"i": i}), Some(i + 1));
        }
        assert_eq!(hub.client_count(), 1, "full channel must not disconnect the client");
        drop(client);
    }

    #[tokio::test]
    async fn closed_receiver_causes_removal_on_next_broadcast() {
        let hub = SseHub::new(DEFAULT_DROP_THRESHOLD, DEFAULT_HEARTBEAT_MS);
        let client = hub.register();
        drop(client.rx);
        hub.broadcast("zabbix.other", &json!({}), Some(1));
        assert_eq!(hub.client_count(), 0);
    }
}
