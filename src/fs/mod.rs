//! Filesystem primitives: the event-driven path watcher and the
//! single-instance lock.

pub mod lock;
pub mod watcher;

pub use lock::FileLock;
pub use watcher::{FsChangeHandler, Operation, PathWatcher, WatcherConfig};
