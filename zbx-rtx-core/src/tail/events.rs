//! Event variants emitted by [`super::file_tailer::FileTailer`] and
//! re-exported (with augmentation) by
//! [`super::directory_tailer::DirectoryTailer`].
//!
//! Grounded on the teacher's `FileWatchEvent`
//! (`ferrex-core/src/database/traits.rs`) and `TailProgress`
//! (`Swatto86-LogSleuth/src/core/model.rs`): both model filesystem-follow
//! activity as a closed set of tagged variants sent over a channel rather
//! than a trait-object callback.

use crate::family::Family;

/// One event from a single followed file. `DirectoryTailer` forwards these
/// upward, attaching `family` to `Data`.
#[derive(Debug, Clone)]
pub enum FileEvent {
    /// Emitted once per successful (re)open, including after rotation.
    Ready { path: String, size: u64, inode: u64 },
    /// One complete, non-empty line.
    Data { path: String, line: String },
    /// Recoverable lifecycle notices: rotation, truncation.
    Info { path: String, msg: String },
    /// Recoverable I/O failure; the tailer will retry.
    Warn { path: String, msg: String },
    /// Reserved for future record-structural validation; never emitted by
    /// this implementation today (the core does not interpret payloads).
    ParseError { path: String, msg: String },
}

/// A [`FileEvent`] as seen by `DirectoryTailer`'s consumer, with family
/// classification attached to `Data` variants and the source path carried
/// alongside every variant for uniform upward forwarding.
#[derive(Debug, Clone)]
pub enum DirEvent {
    Ready { path: String, size: u64, inode: u64 },
    Data { path: String, family: Family, line: String },
    Info { path: String, msg: String },
    Warn { path: String, msg: String },
    ParseError { path: String, msg: String },
}

impl DirEvent {
    pub(super) fn from_file_event(event: FileEvent, family: Family) -> Self {
        match event {
            FileEvent::Ready { path, size, inode } => DirEvent::Ready { path, size, inode },
            FileEvent::Data { path, line } => DirEvent::Data { path, family, line },
            FileEvent::Info { path, msg } => DirEvent::Info { path, msg },
            FileEvent::Warn { path, msg } => DirEvent::Warn { path, msg },
            FileEvent::ParseError { path, msg } => DirEvent::ParseError { path, msg },
        }
    }
}
