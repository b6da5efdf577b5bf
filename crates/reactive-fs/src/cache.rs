//! C2: process-wide mapping from `(op, path, options)` to the last computed
//! value, invalidated whenever the watcher pool reports a change under
//! (or at) that path.
//!
//! Grounded on `services/src/services/pr_cache.rs`'s `PrCache` (a typed
//! cache wrapping one backing store) but keyed generically across the four
//! reactive-fs operations instead of one GitHub-specific shape, and
//! invalidated by path rather than by TTL, since correctness here means
//! "never stale past one debounce window", not "stale after N seconds".

use std::{
    cell::RefCell,
    collections::HashMap,
    hash::{Hash, Hasher},
    path::PathBuf,
    rc::Rc,
};

use reactive::{Context, DepId, DepRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ReadFile,
    ReadDir,
    Stat,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    op: Op,
    path: PathBuf,
    opts_hash: u64,
}

#[derive(Clone)]
pub enum CacheValue {
    ReadFile(Option<Rc<str>>),
    ReadDir(Rc<Vec<String>>),
    Stat(Option<FsStat>),
    Exists(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStat {
    pub is_directory: bool,
}

struct CacheEntry {
    dep_id: DepId,
    value: CacheValue,
}

/// The cache layer. Owns no watchers itself — `reactive-fs`'s `ReactiveFs`
/// wires [`FsCache::invalidate_paths`] as the watcher pool's change
/// listener.
pub struct FsCache {
    registry: Rc<DepRegistry>,
    entries: RefCell<HashMap<CacheKey, CacheEntry>>,
}

impl FsCache {
    pub fn new(registry: Rc<DepRegistry>) -> Self {
        Self {
            registry,
            entries: RefCell::new(HashMap::new()),
        }
    }

    /// `cacheGet`: on hit, records the entry's dependency against the
    /// ambient [`Context`] and returns the value. Reads are always
    /// considered a dependency, hit or miss, which is why the dep is
    /// recorded here rather than only on the miss path in
    /// [`FsCache::put`].
    pub fn get(&self, op: Op, path: &PathBuf, opts_hash: u64) -> Option<CacheValue> {
        let key = CacheKey {
            op,
            path: path.clone(),
            opts_hash,
        };
        let entries = self.entries.borrow();
        let entry = entries.get(&key)?;
        Context::record(entry.dep_id);
        Some(entry.value.clone())
    }

    /// `cachePut`, returning the dep id newly (or previously) associated
    /// with this key so the caller can register it with the watcher pool.
    pub fn put(&self, op: Op, path: &PathBuf, opts_hash: u64, value: CacheValue) -> DepId {
        let key = CacheKey {
            op,
            path: path.clone(),
            opts_hash,
        };
        let dep_id = self
            .entries
            .borrow()
            .get(&key)
            .map(|e| e.dep_id)
            .unwrap_or_else(|| self.registry.alloc());
        Context::record(dep_id);
        self.entries
            .borrow_mut()
            .insert(key, CacheEntry { dep_id, value });
        dep_id
    }

    /// Allocate (without storing a value yet) the dep id a cache miss will
    /// use, so a concurrent read of the same key started before the I/O
    /// completes observes the same id. Not required for correctness given
    /// the single-threaded scheduling model (§5), kept for clarity at call
    /// sites that allocate before awaiting I/O.
    pub fn dep_id_for(&self, op: Op, path: &PathBuf, opts_hash: u64) -> DepId {
        let key = CacheKey {
            op,
            path: path.clone(),
            opts_hash,
        };
        self.entries
            .borrow()
            .get(&key)
            .map(|e| e.dep_id)
            .unwrap_or_else(|| self.registry.alloc())
    }

    /// Invalidate every cache row whose path equals `changed` or is an
    /// ancestor/descendant of it, per §4.2, and wake every effect waiting on
    /// it via the shared [`DepRegistry`].
    pub fn invalidate_paths(&self, changed: &[PathBuf]) {
        let mut to_remove = Vec::new();
        {
            let entries = self.entries.borrow();
            for (key, entry) in entries.iter() {
                let hit = changed
                    .iter()
                    .any(|c| c == &key.path || c.starts_with(&key.path) || key.path.starts_with(c));
                if hit {
                    to_remove.push((key.clone(), entry.dep_id));
                }
            }
        }
        let dep_ids: Vec<DepId> = {
            let mut entries = self.entries.borrow_mut();
            to_remove
                .into_iter()
                .map(|(key, dep_id)| {
                    entries.remove(&key);
                    dep_id
                })
                .collect()
        };
        for dep_id in dep_ids {
            self.registry.invalidate(dep_id);
        }
    }

    /// Test affordance named explicitly in §4.2 ("production paths never
    /// call it").
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

/// Stable hash of a serializable options value, used as the cache key's
/// `opts_hash` component (e.g. `read_dir`'s `directoriesOnly`/`includeHidden`/
/// `exclude`).
pub fn hash_opts(opts: impl Hash) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    opts.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = FsCache::new(DepRegistry::new());
        let path = PathBuf::from("/tmp/a");
        cache.put(Op::Exists, &path, 0, CacheValue::Exists(true));
        match cache.get(Op::Exists, &path, 0) {
            Some(CacheValue::Exists(true)) => {}
            other => panic!("unexpected {:?}", other.is_some()),
        }
    }

    #[test]
    fn invalidation_removes_exact_and_descendant_entries() {
        let registry = DepRegistry::new();
        let cache = FsCache::new(registry.clone());
        let dir = PathBuf::from("/tmp/dir");
        let file = PathBuf::from("/tmp/dir/child.txt");
        let unrelated = PathBuf::from("/tmp/other");

        cache.put(
            Op::ReadDir,
            &dir,
            0,
            CacheValue::ReadDir(Rc::new(vec!["child.txt".into()])),
        );
        cache.put(Op::Exists, &unrelated, 0, CacheValue::Exists(false));

        cache.invalidate_paths(&[file]);

        assert!(cache.get(Op::ReadDir, &dir, 0).is_none());
        assert!(cache.get(Op::Exists, &unrelated, 0).is_some());
    }
}
