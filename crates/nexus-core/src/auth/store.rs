use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use super::storage::TokenStorage;

/// Holder of the single current access token.
///
/// Clones share the same token. Every mutation updates memory and durable
/// storage under one write lock, so readers never observe the two diverging.
/// Writes are last-write-wins.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    token: RwLock<Option<String>>,
    storage: Box<dyn TokenStorage>,
}

impl TokenStore {
    /// Open a store, seeding it from whatever `storage` already holds
    pub fn open(storage: Box<dyn TokenStorage>) -> Self {
        let token = match storage.load() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted token");
                None
            }
        };
        debug!(has_token = token.is_some(), "Token store opened");

        Self {
            inner: Arc::new(StoreInner {
                token: RwLock::new(token),
                storage,
            }),
        }
    }

    pub fn get_token(&self) -> Option<String> {
        self.inner
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_token(&self) -> bool {
        self.inner
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Replace the held token; `None` clears it from storage too
    pub fn set_token(&self, token: Option<String>) {
        let mut held = self
            .inner
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let persisted = match token.as_deref() {
            Some(t) => self.inner.storage.save(t),
            None => self.inner.storage.clear(),
        };
        if let Err(e) = persisted {
            warn!(error = %e, cleared = token.is_none(), "Failed to persist token change");
        }

        *held = token;
    }

    /// Install a token issued by a login flow.
    ///
    /// The remember-me intent is accepted but storage durability is the same
    /// either way.
    pub fn set_token_remembered(&self, token: String, remember_me: bool) {
        debug!(remember_me, "Installing issued token");
        self.set_token(Some(token));
    }

    pub fn clear(&self) {
        self.set_token(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryTokenStorage;

    /// Storage that shares its contents with the test so persistence is observable
    #[derive(Clone, Default)]
    struct SharedStorage(Arc<MemoryTokenStorage>);

    impl TokenStorage for SharedStorage {
        fn load(&self) -> anyhow::Result<Option<String>> {
            self.0.load()
        }
        fn save(&self, token: &str) -> anyhow::Result<()> {
            self.0.save(token)
        }
        fn clear(&self) -> anyhow::Result<()> {
            self.0.clear()
        }
    }

    struct FailingStorage;

    impl TokenStorage for FailingStorage {
        fn load(&self) -> anyhow::Result<Option<String>> {
            Err(anyhow::anyhow!("disk on fire"))
        }
        fn save(&self, _token: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("disk on fire"))
        }
        fn clear(&self) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("disk on fire"))
        }
    }

    #[test]
    fn test_open_seeds_from_storage() {
        let store = TokenStore::open(Box::new(MemoryTokenStorage::with_token("persisted")));
        assert_eq!(store.get_token().as_deref(), Some("persisted"));
    }

    #[test]
    fn test_set_and_clear_persist() {
        let storage = SharedStorage::default();
        let store = TokenStore::open(Box::new(storage.clone()));
        assert!(!store.has_token());

        store.set_token(Some("abc".to_string()));
        assert_eq!(store.get_token().as_deref(), Some("abc"));
        assert_eq!(storage.load().unwrap().as_deref(), Some("abc"));

        store.clear();
        assert_eq!(store.get_token(), None);
        assert_eq!(storage.load().unwrap(), None);
    }

    #[test]
    fn test_clones_share_token() {
        let store = TokenStore::open(Box::new(MemoryTokenStorage::default()));
        let other = store.clone();
        store.set_token(Some("shared".to_string()));
        assert_eq!(other.get_token().as_deref(), Some("shared"));
    }

    #[test]
    fn test_remember_me_persists_identically() {
        let remembered = SharedStorage::default();
        let store = TokenStore::open(Box::new(remembered.clone()));
        store.set_token_remembered("t".to_string(), true);

        let plain = SharedStorage::default();
        let store = TokenStore::open(Box::new(plain.clone()));
        store.set_token_remembered("t".to_string(), false);

        assert_eq!(remembered.load().unwrap(), plain.load().unwrap());
    }

    #[test]
    fn test_storage_failures_are_absorbed() {
        let store = TokenStore::open(Box::new(FailingStorage));
        assert_eq!(store.get_token(), None);
        store.set_token(Some("still-held".to_string()));
        assert_eq!(store.get_token().as_deref(), Some("still-held"));
    }
}
