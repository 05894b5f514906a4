//! Wires the tail engine to the ring buffer and SSE hub (spec §4.5).
//!
//! On each [`DirEvent`], `Data` events are pushed onto the ring and
//! broadcast to the hub with `event = "zabbix." + family` and
//! `id = envelope.id`; every variant is also logged via `tracing` at the
//! matching level, giving operators a local log trail independent of
//! connected SSE clients (spec §10.2).

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zbx_rtx_core::{DirEvent, PendingEnvelope, RingBuffer, SseHub};

/// Drains `rx` until the channel closes (i.e. the `DirectoryTailer` and all
/// its children have stopped), pushing and broadcasting each `Data` event
/// as it arrives.
pub async fn run(mut rx: mpsc::UnboundedReceiver<DirEvent>, ring: Arc<RingBuffer>, hub: Arc<SseHub>) {
    while let Some(event) = rx.recv().await {
        match event {
            DirEvent::Ready { path, size, inode } => {
                info!(path, size, inode, "tailer ready");
            }
            DirEvent::Data { path, family, line } => {
                let pending = PendingEnvelope::new(basename(&path), family, &line);
                let envelope = ring.push(pending, now_millis());
                hub.broadcast(&family.sse_event_name(), &envelope.record, Some(envelope.id));
                debug!(id = envelope.id, %family, "record broadcast");
            }
            DirEvent::Info { path, msg } => {
                info!(path, msg, "tail lifecycle event");
            }
            DirEvent::Warn { path, msg } => {
                warn!(path, msg, "tail recoverable error");
            }
            DirEvent::ParseError { path, msg } => {
                warn!(path, msg, "tail parse error");
            }
        }
    }
}

fn basename(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn data_event_is_pushed_and_broadcast() {
        let ring = Arc::new(RingBuffer::new(8).unwrap());
        let hub = Arc::new(SseHub::new(65_536, 20_000));
        let mut client = hub.register();

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, Arc::clone(&ring), Arc::clone(&hub)));

        tx.send(DirEvent::Data {
            path: "/tmp/problems-x.ndjson".to_string(),
            family: zbx_rtx_core::Family::Problems,
            line: "{\"a\":1}".to_string(),
        })
        .unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(ring.latest_id(), 1);
        let frame = client.rx.recv().await.unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.starts_with("id: 1\nevent: zabbix.problems\n"));
        client.ack(frame.len());
    }

    #[tokio::test]
    async fn lifecycle_events_do_not_touch_the_ring() {
        let ring = Arc::new(RingBuffer::new(8).unwrap());
        let hub = Arc::new(SseHub::new(65_536, 20_000));

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, Arc::clone(&ring), Arc::clone(&hub)));

        tx.send(DirEvent::Ready {
            path: "/tmp/problems-x.ndjson".to_string(),
            size: 0,
            inode: 1,
        })
        .unwrap();
        tx.send(DirEvent::Warn {
            path: "/tmp/problems-x.ndjson".to_string(),
            msg: "stat failed".to_string(),
        })
        .unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(ring.latest_id(), 0);
    }
}
