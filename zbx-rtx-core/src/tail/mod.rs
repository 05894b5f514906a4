//! Multi-file NDJSON tail engine: [`FileTailer`] follows one file,
//! [`DirectoryTailer`] discovers and supervises a set of them.

mod directory_tailer;
mod events;
mod file_tailer;

pub use directory_tailer::{DirectoryTailer, DirectoryTailerConfig};
pub use events::{DirEvent, FileEvent};
pub use file_tailer::{FileTailer, FileTailerHandle};
