//! The `entityKey → abort-token` table (§9). One [`EntityController`] per
//! dynamically added/removed schema or change; every NamedState the
//! kernel starts for that entity is parented to its token, so aborting the
//! entity tears down every effect it owns in one call.

use std::{cell::RefCell, collections::HashMap};

use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct EntityRegistry {
    tokens: RefCell<HashMap<String, CancellationToken>>,
    root: CancellationToken,
}

impl EntityRegistry {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            tokens: RefCell::new(HashMap::new()),
            root,
        }
    }

    /// Idempotent: an entity already present keeps its existing token.
    pub fn ensure(&self, entity_key: &str) -> CancellationToken {
        if let Some(token) = self.tokens.borrow().get(entity_key) {
            return token.clone();
        }
        let token = self.root.child_token();
        self.tokens
            .borrow_mut()
            .insert(entity_key.to_string(), token.clone());
        token
    }

    pub fn contains(&self, entity_key: &str) -> bool {
        self.tokens.borrow().contains_key(entity_key)
    }

    /// Aborts and forgets the entity's token. Callers still need to sweep
    /// matching `StateStore` keys separately (§9's two-phase removal).
    pub fn remove(&self, entity_key: &str) {
        if let Some(token) = self.tokens.borrow_mut().remove(entity_key) {
            token.cancel();
        }
    }

    pub fn entity_keys(&self) -> Vec<String> {
        self.tokens.borrow().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_is_idempotent_and_remove_cancels() {
        let registry = EntityRegistry::new(CancellationToken::new());
        let a = registry.ensure("schema:rfc");
        let b = registry.ensure("schema:rfc");
        assert!(!a.is_cancelled());
        registry.remove("schema:rfc");
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(!registry.contains("schema:rfc"));
    }
}
