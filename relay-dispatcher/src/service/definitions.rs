//! Job definition cache
//!
//! Batch backends require a registered definition before a job can run.
//! Definitions are content-addressed by [`DefinitionKey`], so the cache always
//! looks the deterministic name up remotely before registering anything; the
//! remote service is the durable cache and this type only memoises answers
//! for the lifetime of the process.

use async_trait::async_trait;
use relay_core::DefinitionKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::error::BackendError;

/// Remote side of the cache
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// What registration needs besides the name
    type Spec: Send + Sync;

    /// Finds an active definition registered under `name`
    async fn lookup(&self, name: &str) -> Result<Option<String>, BackendError>;

    /// Registers a new definition and returns its id
    async fn register(&self, name: &str, spec: &Self::Spec) -> Result<String, BackendError>;
}

/// Memoises definition ids per key
///
/// Concurrent callers asking for the same key inside one process wait on a
/// per-key lock, so at most one of them talks to the store. Two processes
/// racing on the same key may both register; the store tolerates that.
#[derive(Debug, Default)]
pub struct JobDefinitionCache {
    known: Mutex<HashMap<DefinitionKey, String>>,
    locks: Mutex<HashMap<DefinitionKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobDefinitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached id for `key`, if any
    pub fn cached(&self, key: &DefinitionKey) -> Option<String> {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key_lock(&self, key: &DefinitionKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Resolves `key` to a definition id, registering it on a remote miss
    pub async fn get_or_register<S>(
        &self,
        key: &DefinitionKey,
        store: &S,
        spec: &S::Spec,
    ) -> Result<String, BackendError>
    where
        S: DefinitionStore + ?Sized,
    {
        if let Some(id) = self.cached(key) {
            return Ok(id);
        }

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        // Someone else may have resolved it while we waited
        if let Some(id) = self.cached(key) {
            return Ok(id);
        }

        let name = key.definition_name();
        let id = match store.lookup(&name).await? {
            Some(id) => {
                debug!("Reusing job definition {} ({})", name, id);
                id
            }
            None => {
                info!("Registering job definition {}", name);
                store.register(&name, spec).await?
            }
        };

        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), id.clone());

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::DestinationParams;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingStore {
        existing: Mutex<HashMap<String, String>>,
        lookups: AtomicUsize,
        registrations: AtomicUsize,
        fail_lookup: bool,
    }

    #[async_trait]
    impl DefinitionStore for CountingStore {
        type Spec = ();

        async fn lookup(&self, name: &str) -> Result<Option<String>, BackendError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail_lookup {
                return Err(BackendError::Protocol("lookup unavailable".to_string()));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(self.existing.lock().unwrap().get(name).cloned())
        }

        async fn register(&self, name: &str, _spec: &()) -> Result<String, BackendError> {
            let n = self.registrations.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let id = format!("arn:definition/{}:{}", name, n + 1);
            self.existing
                .lock()
                .unwrap()
                .insert(name.to_string(), id.clone());
            Ok(id)
        }
    }

    fn key(version: &str) -> DefinitionKey {
        DefinitionKey::derive("bwa", version, &DestinationParams::default())
    }

    #[tokio::test]
    async fn test_registers_once_per_key() {
        let cache = JobDefinitionCache::new();
        let store = CountingStore::default();

        let first = cache.get_or_register(&key("1"), &store, &()).await.unwrap();
        let second = cache.get_or_register(&key("1"), &store, &()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.registrations.load(Ordering::SeqCst), 1);
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_converge() {
        let cache = Arc::new(JobDefinitionCache::new());
        let store = Arc::new(CountingStore::default());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_register(&key("1"), store.as_ref(), &())
                    .await
                    .unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.registrations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lookup_before_create() {
        let cache = JobDefinitionCache::new();
        let store = CountingStore::default();
        store.existing.lock().unwrap().insert(
            key("2").definition_name(),
            "arn:definition/existing:7".to_string(),
        );

        let id = cache.get_or_register(&key("2"), &store, &()).await.unwrap();

        assert_eq!(id, "arn:definition/existing:7");
        assert_eq!(store.registrations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_register_separately() {
        let cache = JobDefinitionCache::new();
        let store = CountingStore::default();

        let a = cache.get_or_register(&key("1"), &store, &()).await.unwrap();
        let b = cache.get_or_register(&key("2"), &store, &()).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
        assert_eq!(store.registrations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_not_cached() {
        let cache = JobDefinitionCache::new();
        let store = CountingStore {
            fail_lookup: true,
            ..Default::default()
        };

        assert!(cache.get_or_register(&key("1"), &store, &()).await.is_err());
        assert!(cache.is_empty());
        assert_eq!(store.registrations.load(Ordering::SeqCst), 0);
    }
}
