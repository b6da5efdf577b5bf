//! The `stateKey → handle` / `entityKey → abort-token` tables from §9's
//! re-architecture guidance, plus the tagged union of every NamedState
//! payload shape in the catalogue (§4.6).

use std::{cell::RefCell, collections::HashMap, path::PathBuf, rc::Rc};

use openspec_cli::{ApplyInstructions, ArtifactInstructions, SchemaResolution, SchemaInfo, TemplatesMap};
use reactive::{DepRegistry, ReactiveValue};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    error::KernelError,
    types::{ChangeFile, ChangeStatus, GlobFileMatch, SchemaDetail, TemplateContentsMap},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value")]
pub enum StateValue {
    Schemas(Vec<SchemaInfo>),
    ChangeIds(Vec<String>),
    ProjectConfig(Option<String>),
    StatusList(Vec<ChangeStatus>),
    SchemaResolution(SchemaResolution),
    SchemaDetail(SchemaDetail),
    SchemaFiles(Vec<ChangeFile>),
    SchemaYaml(Option<String>),
    Templates(TemplatesMap),
    TemplateContents(TemplateContentsMap),
    ChangeStatus(ChangeStatus),
    ArtifactInstructions(ArtifactInstructions),
    ApplyInstructions(ApplyInstructions),
    ChangeMetadata(Option<String>),
    ArtifactOutput(Option<String>),
    GlobArtifactFiles(Vec<GlobFileMatch>),
}

/// One entry per ensured key: the `ReactiveValue` the effect publishes
/// into, the token that tears its effect down, and the most recent error
/// (kept separately — per §4.4 an error does not clobber the last
/// successful value).
struct StateEntry {
    value: Rc<ReactiveValue<Option<StateValue>>>,
    cancel: CancellationToken,
    last_error: RefCell<Option<KernelError>>,
}

#[derive(Clone)]
pub struct StateStore {
    entries: Rc<RefCell<HashMap<String, Rc<StateEntry>>>>,
    registry: Rc<DepRegistry>,
}

impl StateStore {
    pub fn new(registry: Rc<DepRegistry>) -> Self {
        Self {
            entries: Rc::new(RefCell::new(HashMap::new())),
            registry,
        }
    }

    pub fn is_ensured(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    /// Creates the entry's `ReactiveValue` if absent and returns it, along
    /// with whether this call created it (so a caller only spawns the
    /// effect on first ensure, satisfying §8's "the i-th ensureX call for
    /// i > 1 creates zero new effects").
    pub fn get_or_create(
        &self,
        key: &str,
        cancel: CancellationToken,
    ) -> (Rc<ReactiveValue<Option<StateValue>>>, bool) {
        if let Some(entry) = self.entries.borrow().get(key) {
            return (entry.value.clone(), false);
        }
        let value = Rc::new(ReactiveValue::new(self.registry.clone(), None));
        let entry = Rc::new(StateEntry {
            value: value.clone(),
            cancel,
            last_error: RefCell::new(None),
        });
        self.entries.borrow_mut().insert(key.to_string(), entry);
        (value, true)
    }

    /// Registers a listener on the key's underlying `ReactiveValue`, fired
    /// on every successful rerun (§4.6 Dynamic: "two watchers fire on
    /// `schemas`/`changeIds` changes"). No-op if the key was never ensured.
    pub fn on_change(&self, key: &str, listener: impl Fn(&StateValue) + 'static) {
        if let Some(entry) = self.entries.borrow().get(key) {
            entry.value.on_change(move |v| {
                if let Some(v) = v {
                    listener(v);
                }
            });
        }
    }

    pub fn set_last_error(&self, key: &str, err: KernelError) {
        if let Some(entry) = self.entries.borrow().get(key) {
            *entry.last_error.borrow_mut() = Some(err);
        }
    }

    pub fn last_error(&self, key: &str) -> Option<KernelError> {
        self.entries
            .borrow()
            .get(key)
            .and_then(|e| e.last_error.borrow().clone())
    }

    /// §4.6's `getX`: a pure read. Throws (returns `MissingKey`) if the key
    /// was never ensured or has not produced a first value yet.
    pub fn get(&self, key: &str) -> Result<StateValue, KernelError> {
        match self.peek(key) {
            Some(value) => Ok(value),
            None => Err(KernelError::MissingKey {
                key: key.to_string(),
            }),
        }
    }

    /// §4.6's `peekX`: returns `None` rather than erroring when unensured.
    pub fn peek(&self, key: &str) -> Option<StateValue> {
        self.entries.borrow().get(key)?.value.get()
    }

    /// Direct access to the key's `ReactiveValue`, for subscribers that
    /// tap into the kernel's single shared effect rather than starting
    /// their own (§3: "the effect is owned by the Kernel, not by any
    /// single subscriber").
    pub fn value_handle(&self, key: &str) -> Option<Rc<ReactiveValue<Option<StateValue>>>> {
        self.entries.borrow().get(key).map(|e| e.value.clone())
    }

    /// Two-phase entity teardown (§9): abort every matching entry's
    /// cancellation token, then drop the entries themselves.
    pub fn remove_prefix(&self, prefix: &str) {
        let mut entries = self.entries.borrow_mut();
        let matching: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &matching {
            if let Some(entry) = entries.get(key) {
                entry.cancel.cancel();
            }
        }
        for key in &matching {
            entries.remove(key);
        }
    }

    /// Test affordance mirroring `reactive-fs`'s `clear_cache`/
    /// `close_all_watchers` pair (§9's "simulate a fresh process").
    pub fn clear(&self) {
        let mut entries = self.entries.borrow_mut();
        for entry in entries.values() {
            entry.cancel.cancel();
        }
        entries.clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }
}

/// Path-safety guard for §7's "Invalid path: outside schema root": resolves
/// `candidate` relative to `root` and rejects escapes via `..` traversal.
pub fn resolve_within(root: &std::path::Path, candidate: &str) -> Result<PathBuf, KernelError> {
    let joined = root.join(candidate);
    let normalized = normalize_lexically(&joined);
    let normalized_root = normalize_lexically(root);
    if normalized.starts_with(&normalized_root) {
        Ok(normalized)
    } else {
        Err(KernelError::PathSafety)
    }
}

fn normalize_lexically(path: &std::path::Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_within_rejects_parent_escapes() {
        let root = PathBuf::from("/workspace/openspec/changes/demo");
        assert!(resolve_within(&root, "notes.md").is_ok());
        assert!(resolve_within(&root, "../../etc/passwd").is_err());
    }

    #[test]
    fn get_or_create_only_creates_once() {
        let registry = DepRegistry::new();
        let store = StateStore::new(registry);
        let cancel = CancellationToken::new();
        let (_, created_first) = store.get_or_create("global:schemas", cancel.clone());
        let (_, created_second) = store.get_or_create("global:schemas", cancel);
        assert!(created_first);
        assert!(!created_second);
    }

    #[test]
    fn remove_prefix_cancels_and_drops_matching_entries() {
        let registry = DepRegistry::new();
        let store = StateStore::new(registry);
        let cancel = CancellationToken::new();
        let (value, _) = store.get_or_create("change:demo:status", cancel.clone());
        value.set(Some(StateValue::ChangeMetadata(None)));
        store.get_or_create("global:schemas", CancellationToken::new());

        store.remove_prefix("change:demo:");

        assert!(cancel.is_cancelled());
        assert!(!store.is_ensured("change:demo:status"));
        assert!(store.is_ensured("global:schemas"));
    }
}
