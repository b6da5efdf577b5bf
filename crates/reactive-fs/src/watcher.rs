//! C1: one native directory watcher per distinct path, reference-counted,
//! with debounced change fan-out.
//!
//! Grounded on `services/src/services/watcher_manager.rs`'s
//! `WatcherManager`/`SharedWatcher` shape (refcounted map of canonical path
//! to a shared watcher, torn down when the last handle is dropped), adapted
//! from a broadcast channel (needed there for many concurrent browser tabs)
//! to a plain listener closure (here there is exactly one internal
//! consumer: the cache layer's invalidation routine) and from a forwarding
//! OS thread to a `spawn_local` task, since the whole reactive-fs layer is
//! confined to the kernel's single cooperative thread.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    rc::{Rc, Weak},
    time::Duration,
};

use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("failed to create filesystem watcher for {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// `(path, recursive)` — the key under which watchers are deduplicated.
/// `includeHidden` is deliberately absent: per §4.1, hidden-entry filtering
/// happens per subscription, not per watcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatcherKey {
    pub path: PathBuf,
    pub recursive: bool,
}

type ChangeListener = Rc<dyn Fn(&[PathBuf])>;

struct SharedWatcher {
    // Kept alive for as long as any handle references this watcher; never
    // read directly again once constructed.
    _debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
}

/// Reference-counted handle to a watcher. Dropping the last handle for a
/// key closes the underlying OS watcher immediately, per §4.1's `release()`.
pub struct WatcherHandle {
    key: WatcherKey,
    pool: WatcherPool,
    _shared: Rc<SharedWatcher>,
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.pool.cleanup_if_unused(&self.key);
    }
}

#[derive(Clone)]
pub struct WatcherPool {
    inner: Rc<PoolInner>,
}

struct PoolInner {
    watchers: std::cell::RefCell<HashMap<WatcherKey, Weak<SharedWatcher>>>,
    on_change: ChangeListener,
    debounce: Duration,
}

impl WatcherPool {
    /// `on_change` is invoked (on the kernel's own task, via `spawn_local`)
    /// with the batch of paths a debounce window observed changing, for
    /// every watcher in the pool. `debounce` is the quality knob named in
    /// §9 ("approximately 50ms").
    pub fn new(debounce: Duration, on_change: impl Fn(&[PathBuf]) + 'static) -> Self {
        Self {
            inner: Rc::new(PoolInner {
                watchers: std::cell::RefCell::new(HashMap::new()),
                on_change: Rc::new(on_change),
                debounce,
            }),
        }
    }

    /// Acquire (creating if necessary) the watcher for `key`. Per §4.1,
    /// callers should not pre-check existence: a watcher on a not-yet-
    /// existing path is registered and starts firing once the path appears.
    pub fn acquire(&self, key: WatcherKey) -> Result<WatcherHandle, WatcherError> {
        if let Some(shared) = self.upgrade(&key) {
            return Ok(WatcherHandle {
                key,
                pool: self.clone(),
                _shared: shared,
            });
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
        let debouncer = new_debouncer(self.inner.debounce, None, move |result| {
            // Called from the debouncer's internal watcher thread; the
            // unbounded sender's `send` is synchronous, so no blocking here.
            let _ = tx.send(result);
        })
        .map_err(|source| WatcherError::Create {
            path: key.path.clone(),
            source,
        })?;

        let mode = if key.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        // A missing path is accepted by `notify`; the watch becomes live
        // once the path is created, satisfying the "do not pre-check
        // existence" contract.
        let mut debouncer = debouncer;
        debouncer
            .watch(&key.path, mode)
            .map_err(|source| WatcherError::Create {
                path: key.path.clone(),
                source,
            })?;

        let shared = Rc::new(SharedWatcher {
            _debouncer: debouncer,
        });

        let on_change = self.inner.on_change.clone();
        tokio::task::spawn_local(async move {
            while let Some(result) = rx.recv().await {
                match result {
                    Ok(events) => {
                        let paths: Vec<PathBuf> =
                            events.into_iter().flat_map(|e| e.paths).collect();
                        if !paths.is_empty() {
                            on_change(&paths);
                        }
                    }
                    Err(errors) => {
                        for error in errors {
                            tracing::warn!("watcher error: {error}");
                        }
                    }
                }
            }
        });

        self.inner
            .watchers
            .borrow_mut()
            .insert(key.clone(), Rc::downgrade(&shared));

        Ok(WatcherHandle {
            key,
            pool: self.clone(),
            _shared: shared,
        })
    }

    fn upgrade(&self, key: &WatcherKey) -> Option<Rc<SharedWatcher>> {
        self.inner.watchers.borrow().get(key).and_then(Weak::upgrade)
    }

    fn cleanup_if_unused(&self, key: &WatcherKey) {
        let mut watchers = self.inner.watchers.borrow_mut();
        if let Some(weak) = watchers.get(key) {
            if weak.upgrade().is_none() {
                watchers.remove(key);
            }
        }
    }

    /// Number of live watchers. Exposed for tests/metrics, same as
    /// `WatcherManager::active_watcher_count` in the teacher.
    pub fn active_watcher_count(&self) -> usize {
        self.inner
            .watchers
            .borrow()
            .values()
            .filter(|w| w.upgrade().is_some())
            .count()
    }
}

pub fn canonicalize_best_effort(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, fs};
    use tempfile::TempDir;

    #[tokio::test]
    async fn acquiring_the_same_key_twice_reuses_the_watcher() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let pool = WatcherPool::new(Duration::from_millis(20), |_| {});
                let dir = TempDir::new().unwrap();
                let key = WatcherKey {
                    path: canonicalize_best_effort(dir.path()),
                    recursive: false,
                };

                let h1 = pool.acquire(key.clone()).unwrap();
                let h2 = pool.acquire(key.clone()).unwrap();
                assert_eq!(pool.active_watcher_count(), 1);

                drop(h1);
                drop(h2);
            })
            .await;
    }

    #[tokio::test]
    async fn change_listener_fires_on_file_write() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let seen = Rc::new(RefCell::new(Vec::<PathBuf>::new()));
                let seen_clone = seen.clone();
                let pool = WatcherPool::new(Duration::from_millis(20), move |paths| {
                    seen_clone.borrow_mut().extend_from_slice(paths);
                });

                let dir = TempDir::new().unwrap();
                let key = WatcherKey {
                    path: canonicalize_best_effort(dir.path()),
                    recursive: false,
                };
                let _handle = pool.acquire(key).unwrap();

                let file = dir.path().join("a.txt");
                fs::write(&file, "hi").unwrap();

                tokio::time::sleep(Duration::from_millis(300)).await;
                assert!(!seen.borrow().is_empty());
            })
            .await;
    }
}
