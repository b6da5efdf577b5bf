//! Reactive filesystem layer: C1 (watcher pool), C2 (cache layer), and C5
//! (the `reactive*` read operations built on top of them).

mod cache;
mod fs;
mod watcher;

pub use cache::{FsStat, Op};
pub use fs::{ReactiveFs, ReadDirOptions};
pub use watcher::{canonicalize_best_effort, WatcherError, WatcherKey, WatcherPool};
