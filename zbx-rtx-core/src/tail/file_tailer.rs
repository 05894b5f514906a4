//! Follows one append-only file through appends, truncations, rotations,
//! and partial lines.
//!
//! Grounded on the teacher's polling shape from
//! `Swatto86-LogSleuth/src/app/tail.rs` (`FileState` carrying path/offset/
//! partial-buffer, a fixed-interval poll loop, truncation-resets-offset
//! recovery) ported from a background OS thread + `mpsc` to a `tokio` task
//! driven by `tokio::select!`, since the rest of this crate is async.

use std::io::SeekFrom;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::events::FileEvent;

/// Cap on a single positional read, per cycle, per spec §4.1 step 5.
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Handle returned by [`FileTailer::spawn`]. Dropping it does not stop the
/// tailer; call [`FileTailerHandle::stop`] explicitly.
#[derive(Debug)]
pub struct FileTailerHandle {
    path: PathBuf,
    stop: CancellationToken,
    poke: Arc<Notify>,
    task: tokio::task::JoinHandle<()>,
}

impl FileTailerHandle {
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Resets backoff and triggers an immediate cycle. Used by
    /// `DirectoryTailer` when a filesystem-change hint arrives; purely a
    /// latency optimization (spec §4.1 backoff notes).
    pub fn poke(&self) {
        self.poke.notify_one();
    }

    /// Signals the loop to stop and waits for it to exit. The caller is
    /// responsible for applying a bound (e.g. `tokio::time::timeout`) if an
    /// upper bound on wait time is required; see `DirectoryTailer::stop`.
    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.task.await;
    }
}

struct State {
    file: Option<File>,
    inode: Option<u64>,
    offset: u64,
    buf: Vec<u8>,
}

/// Follows `path`, emitting [`FileEvent`]s on `tx` until stopped.
///
/// `begin_at_tail`: if true, the first open seeks to the file's current end
/// so only content appended after start is delivered; if false, the file is
/// read from offset 0 on first open.
#[derive(Debug)]
pub struct FileTailer;

impl FileTailer {
    pub fn spawn(
        path: PathBuf,
        poll_interval_ms: u64,
        max_backoff_ms: u64,
        begin_at_tail: bool,
        tx: mpsc::UnboundedSender<FileEvent>,
    ) -> FileTailerHandle {
        let stop = CancellationToken::new();
        let poke = Arc::new(Notify::new());

        let task_stop = stop.clone();
        let task_poke = Arc::clone(&poke);
        let task_path = path.clone();

        let task = tokio::spawn(async move {
            run(task_path, poll_interval_ms, max_backoff_ms, begin_at_tail, tx, task_stop, task_poke)
                .await;
        });

        FileTailerHandle { path, stop, poke, task }
    }
}

async fn run(
    path: PathBuf,
    poll_interval_ms: u64,
    max_backoff_ms: u64,
    begin_at_tail: bool,
    tx: mpsc::UnboundedSender<FileEvent>,
    stop: CancellationToken,
    poke: Arc<Notify>,
) {
    let path_str = path.to_string_lossy().to_string();
    let mut state = State {
        file: None,
        inode: None,
        offset: 0,
        buf: Vec::new(),
    };
    let mut backoff_ms = poll_interval_ms.max(1);
    // Guards against overlapping cycles; this task is the sole driver of its
    // own loop so in practice a new cycle is only ever scheduled after the
    // previous returns, but the flag documents the single-flight invariant
    // (spec §4.1) for anyone adding a second entry point later.
    let in_progress = AtomicBool::new(false);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
            _ = poke.notified() => {
                backoff_ms = poll_interval_ms.max(1);
            }
        }

        if stop.is_cancelled() {
            break;
        }

        if in_progress.swap(true, Ordering::AcqRel) {
            continue;
        }
        let made_progress = run_cycle(&path, &path_str, begin_at_tail, &mut state, &tx).await;
        in_progress.store(false, Ordering::Release);

        backoff_ms = if made_progress {
            poll_interval_ms.max(1)
        } else {
            (backoff_ms * 2).min(max_backoff_ms.max(poll_interval_ms.max(1)))
        };
    }
}

/// One polling cycle. Returns true if any bytes were read (drives backoff).
async fn run_cycle(
    path: &PathBuf,
    path_str: &str,
    begin_at_tail: bool,
    state: &mut State,
    tx: &mpsc::UnboundedSender<FileEvent>,
) -> bool {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(err) => {
            let _ = tx.send(FileEvent::Warn {
                path: path_str.to_string(),
                msg: format!("stat failed: {err}"),
            });
            state.file = None;
            return false;
        }
    };
    let current_inode = meta.ino();
    let size = meta.len();

    if let Some(prior_inode) = state.inode {
        if prior_inode != current_inode {
            let _ = tx.send(FileEvent::Info {
                path: path_str.to_string(),
                msg: "inode changed -> reopen".to_string(),
            });
            state.file = None;
            state.offset = 0;
            state.buf.clear();
        }
    }

    if state.file.is_none() {
        match File::open(path).await {
            Ok(mut file) => {
                state.inode = Some(current_inode);
                if begin_at_tail && state.offset == 0 {
                    state.offset = size;
                }
                if state.offset > 0 {
                    if let Err(err) = file.seek(SeekFrom::Start(state.offset)).await {
                        let _ = tx.send(FileEvent::Warn {
                            path: path_str.to_string(),
                            msg: format!("seek failed: {err}"),
                        });
                        return false;
                    }
                }
                let _ = tx.send(FileEvent::Ready {
                    path: path_str.to_string(),
                    size,
                    inode: current_inode,
                });
                state.file = Some(file);
            }
            Err(err) => {
                let _ = tx.send(FileEvent::Warn {
                    path: path_str.to_string(),
                    msg: format!("open failed: {err}"),
                });
                return false;
            }
        }
    }

    let Some(file) = state.file.as_mut() else {
        return false;
    };

    if size < state.offset {
        let _ = tx.send(FileEvent::Info {
            path: path_str.to_string(),
            msg: "truncated -> reset offset".to_string(),
        });
        state.offset = 0;
        state.buf.clear();
        if let Err(err) = file.seek(SeekFrom::Start(0)).await {
            let _ = tx.send(FileEvent::Warn {
                path: path_str.to_string(),
                msg: format!("seek failed: {err}"),
            });
            state.file = None;
            return false;
        }
    }

    if size <= state.offset {
        return false;
    }

    let mut remaining = size - state.offset;
    let mut total_read: u64 = 0;
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];

    while remaining > 0 {
        let want = remaining.min(READ_CHUNK_BYTES as u64) as usize;
        match file.read(&mut chunk[..want]).await {
            Ok(0) => break,
            Ok(n) => {
                on_bytes(&chunk[..n], path_str, state, tx);
                total_read += n as u64;
                remaining -= n as u64;
            }
            Err(err) => {
                let _ = tx.send(FileEvent::Warn {
                    path: path_str.to_string(),
                    msg: format!("read failed: {err}"),
                });
                state.file = None;
                break;
            }
        }
    }

    state.offset += total_read;
    total_read > 0
}

/// Appends `bytes` to the assembly buffer and emits one `Data` event per
/// complete, non-empty line, retaining any unterminated suffix.
fn on_bytes(bytes: &[u8], path_str: &str, state: &mut State, tx: &mpsc::UnboundedSender<FileEvent>) {
    state.buf.extend_from_slice(bytes);

    let mut start = 0;
    while let Some(rel_nl) = state.buf[start..].iter().position(|&b| b == b'\n') {
        let mut end = start + rel_nl;
        if end > start && state.buf[end - 1] == b'\r' {
            end -= 1;
        }
        if end > start {
            let line = String::from_utf8_lossy(&state.buf[start..end]).into_owned();
            let _ = tx.send(FileEvent::Data {
                path: path_str.to_string(),
                line,
            });
        }
        start = start + rel_nl + 1;
    }
    state.buf.drain(0..start);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::time::Duration as TokioDuration;

    async fn drain_data(rx: &mut mpsc::UnboundedReceiver<FileEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = tokio::time::timeout(TokioDuration::from_millis(300), rx.recv()).await {
            match event {
                Some(FileEvent::Data { line, .. }) => out.push(line),
                Some(_) => {}
                None => break,
            }
        }
        out
    }

    #[tokio::test]
    async fn emits_each_complete_line_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("problems-x.ndjson");
        std::fs::write(&path, "{\"a\":1}\n{\"a\":2}\n").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = FileTailer::spawn(path, 20, 200, false, tx);

        let lines = drain_data(&mut rx).await;
        assert_eq!(lines, vec!["{\"a\":1}".to_string(), "{\"a\":2}".to_string()]);
        handle.stop().await;
    }

    #[tokio::test]
    async fn partial_line_waits_for_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("problems-x.ndjson");
        std::fs::write(&path, "{\"a\":").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = FileTailer::spawn(path.clone(), 20, 200, false, tx);

        let none_yet = tokio::time::timeout(TokioDuration::from_millis(150), rx.recv()).await;
        // Only a Ready event should have arrived so far, no Data.
        if let Ok(Some(event)) = none_yet {
            assert!(!matches!(event, FileEvent::Data { .. }));
        }

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "3}}").unwrap();

        let lines = drain_data(&mut rx).await;
        assert_eq!(lines, vec!["{\"a\":3}".to_string()]);
        handle.stop().await;
    }

    #[tokio::test]
    async fn truncation_resets_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history-1.ndjson");
        std::fs::write(&path, "A\nB\n").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = FileTailer::spawn(path.clone(), 20, 200, false, tx);
        let lines = drain_data(&mut rx).await;
        assert_eq!(lines, vec!["A".to_string(), "B".to_string()]);

        std::fs::write(&path, "C\n").unwrap();
        let lines = drain_data(&mut rx).await;
        assert_eq!(lines, vec!["C".to_string()]);
        handle.stop().await;
    }

    #[tokio::test]
    async fn rotation_does_not_duplicate_old_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history-1.ndjson");
        std::fs::write(&path, "A\n").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = FileTailer::spawn(path.clone(), 20, 200, false, tx);
        let lines = drain_data(&mut rx).await;
        assert_eq!(lines, vec!["A".to_string()]);

        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, "B\n").unwrap();

        let lines = drain_data(&mut rx).await;
        assert_eq!(lines, vec!["B".to_string()]);
        handle.stop().await;
    }

    #[tokio::test]
    async fn crlf_and_empty_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history-1.ndjson");
        std::fs::write(&path, "A\r\n\nB\r\n").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = FileTailer::spawn(path, 20, 200, false, tx);
        let lines = drain_data(&mut rx).await;
        assert_eq!(lines, vec!["A".to_string(), "B".to_string()]);
        handle.stop().await;
    }
}
