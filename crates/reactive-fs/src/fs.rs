//! C5: `read-file`, `read-dir`, `stat`, `exists` — the reactive filesystem
//! wrappers every `NamedState` task in the kernel reads through.

use std::{
    path::{Path, PathBuf},
    rc::Rc,
    time::Duration,
};

use reactive::DepRegistry;

use crate::{
    cache::{hash_opts, CacheValue, FsCache, FsStat, Op},
    watcher::{canonicalize_best_effort, WatcherError, WatcherHandle, WatcherKey, WatcherPool},
};

#[derive(Debug, Clone, Default, Hash)]
pub struct ReadDirOptions {
    pub directories_only: bool,
    pub include_hidden: bool,
    pub exclude: Vec<String>,
}

/// Ties the watcher pool (C1) and cache layer (C2) together behind the four
/// reactive read operations (C5). One `ReactiveFs` per kernel.
pub struct ReactiveFs {
    cache: Rc<FsCache>,
    watchers: WatcherPool,
    // Cache rows keep their watcher alive by holding a clone of its handle;
    // `ReactiveFs` itself only needs the pool to acquire new ones.
    handles: std::cell::RefCell<std::collections::HashMap<WatcherKey, Rc<WatcherHandle>>>,
}

impl ReactiveFs {
    pub fn new(registry: Rc<DepRegistry>, debounce: Duration) -> Self {
        let cache = Rc::new(FsCache::new(registry.clone()));
        let cache_for_watch = cache.clone();
        let watchers = WatcherPool::new(debounce, move |paths| {
            cache_for_watch.invalidate_paths(paths);
        });
        Self {
            cache,
            watchers,
            handles: std::cell::RefCell::new(std::collections::HashMap::new()),
        }
    }

    fn ensure_watch(&self, watch_path: &Path) -> Result<(), WatcherError> {
        let key = WatcherKey {
            path: canonicalize_best_effort(watch_path),
            recursive: false,
        };
        if self.handles.borrow().contains_key(&key) {
            return Ok(());
        }
        let handle = self.watchers.acquire(key.clone())?;
        self.handles.borrow_mut().insert(key, Rc::new(handle));
        Ok(())
    }

    /// `reactiveReadFile(p) -> string | null`. Missing files return `None`
    /// rather than failing; the dependency edge is still installed so the
    /// file's creation triggers a re-run.
    pub async fn read_file(&self, path: &Path) -> Option<Rc<str>> {
        let canonical = canonicalize_best_effort(path);
        let watch_dir = canonical.parent().unwrap_or(&canonical).to_path_buf();
        let _ = self.ensure_watch(&watch_dir);

        if let Some(CacheValue::ReadFile(v)) = self.cache.get(Op::ReadFile, &canonical, 0) {
            return v;
        }

        let value = tokio::fs::read_to_string(&canonical)
            .await
            .ok()
            .map(|s| Rc::from(s.as_str()));
        self.cache
            .put(Op::ReadFile, &canonical, 0, CacheValue::ReadFile(value.clone()));
        value
    }

    /// `reactiveStat(p) -> {isDirectory} | null`.
    pub async fn stat(&self, path: &Path) -> Option<FsStat> {
        let canonical = canonicalize_best_effort(path);
        let watch_dir = canonical.parent().unwrap_or(&canonical).to_path_buf();
        let _ = self.ensure_watch(&watch_dir);

        if let Some(CacheValue::Stat(v)) = self.cache.get(Op::Stat, &canonical, 0) {
            return v;
        }

        let value = tokio::fs::metadata(&canonical)
            .await
            .ok()
            .map(|m| FsStat { is_directory: m.is_dir() });
        self.cache.put(Op::Stat, &canonical, 0, CacheValue::Stat(value));
        value
    }

    /// `reactiveExists(p) -> boolean`.
    pub async fn exists(&self, path: &Path) -> bool {
        self.stat(path).await.is_some()
    }

    /// `reactiveReadDir(p, opts) -> string[]`. Filters (`exclude`,
    /// hidden-entry default exclusion) are applied after reading and do not
    /// change the dependency edge, per §4.5.
    pub async fn read_dir(&self, path: &Path, opts: &ReadDirOptions) -> Vec<String> {
        let canonical = canonicalize_best_effort(path);
        let _ = self.ensure_watch(&canonical);

        let opts_hash = hash_opts((
            opts.directories_only,
            opts.include_hidden,
            opts.exclude.clone(),
        ));

        if let Some(CacheValue::ReadDir(v)) = self.cache.get(Op::ReadDir, &canonical, opts_hash) {
            return filter_entries(&v, opts);
        }

        let mut names = Vec::new();
        if let Ok(mut read_dir) = tokio::fs::read_dir(&canonical).await {
            while let Ok(Some(entry)) = read_dir.next_entry().await {
                if opts.directories_only {
                    let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                    if !is_dir {
                        continue;
                    }
                }
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        let all = Rc::new(names);
        self.cache
            .put(Op::ReadDir, &canonical, opts_hash, CacheValue::ReadDir(all.clone()));
        filter_entries(&all, opts)
    }

    /// Test affordance named explicitly in §4.2/§9: simulate a fresh process
    /// without restarting it. Never called from production code paths.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn active_watcher_count(&self) -> usize {
        self.watchers.active_watcher_count()
    }
}

fn filter_entries(entries: &[String], opts: &ReadDirOptions) -> Vec<String> {
    entries
        .iter()
        .filter(|name| opts.include_hidden || !name.starts_with('.'))
        .filter(|name| !opts.exclude.iter().any(|ex| ex == *name))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, time::Duration};
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_reads_as_none_but_still_watches() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let dir = TempDir::new().unwrap();
                let fs_layer = ReactiveFs::new(DepRegistry::new(), Duration::from_millis(20));
                let path = dir.path().join("missing.txt");

                assert!(fs_layer.read_file(&path).await.is_none());
                assert_eq!(fs_layer.active_watcher_count(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn read_dir_excludes_hidden_and_named_entries_after_caching() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let dir = TempDir::new().unwrap();
                fs::write(dir.path().join("a.md"), "a").unwrap();
                fs::write(dir.path().join(".hidden"), "h").unwrap();
                fs::create_dir(dir.path().join("archive")).unwrap();

                let fs_layer = ReactiveFs::new(DepRegistry::new(), Duration::from_millis(20));
                let opts = ReadDirOptions {
                    directories_only: false,
                    include_hidden: false,
                    exclude: vec!["archive".to_string()],
                };
                let names = fs_layer.read_dir(dir.path(), &opts).await;
                assert_eq!(names, vec!["a.md".to_string()]);
            })
            .await;
    }

    #[tokio::test]
    async fn read_file_is_cached_until_invalidated() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let dir = TempDir::new().unwrap();
                let path = dir.path().join("f.txt");
                fs::write(&path, "one").unwrap();

                let fs_layer = ReactiveFs::new(DepRegistry::new(), Duration::from_millis(20));
                assert_eq!(fs_layer.read_file(&path).await.as_deref(), Some("one"));

                fs::write(&path, "two").unwrap();
                // still cached immediately after the write, before the debounce window fires
                assert_eq!(fs_layer.read_file(&path).await.as_deref(), Some("one"));

                tokio::time::sleep(Duration::from_millis(300)).await;
                assert_eq!(fs_layer.read_file(&path).await.as_deref(), Some("two"));
            })
            .await;
    }
}
