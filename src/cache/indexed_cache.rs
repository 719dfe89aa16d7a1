use super::errors::CacheError;
use super::subscription::{CacheChange, SubscriptionManager};
use super::{Cache, KeyFn, PRIMARY_INDEX};
use crate::error::Result;
use crate::sync::config::SUBSCRIPTION_CHANNEL_CAPACITY;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::{Bound, ControlFlow};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory cache with a unique primary index and any number of named
/// secondary indices.
pub struct IndexedCache<V> {
    indexers: HashMap<String, KeyFn<V>>,
    store: RwLock<Store<V>>,
    revision: AtomicU64,
    pub subscription_manager: Arc<SubscriptionManager<V>>,
}

struct Store<V> {
    objects: BTreeMap<String, V>,
    /// index name -> index key -> primary key
    indices: HashMap<String, BTreeMap<String, String>>,
}

pub struct IndexedCacheBuilder<V> {
    indexers: HashMap<String, KeyFn<V>>,
    subscription_capacity: usize,
}

impl<V> IndexedCacheBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Adds a secondary index. Registering `PRIMARY_INDEX` replaces the
    /// primary key function.
    #[must_use]
    pub fn index<F>(mut self, name: &str, key_fn: F) -> Self
    where
        F: Fn(&V) -> Result<Option<String>> + Send + Sync + 'static,
    {
        self.indexers.insert(name.to_string(), Arc::new(key_fn));
        self
    }

    #[must_use]
    pub const fn subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity;
        self
    }

    #[must_use]
    pub fn build(self) -> IndexedCache<V> {
        let indices = self
            .indexers
            .keys()
            .filter(|name| name.as_str() != PRIMARY_INDEX)
            .map(|name| (name.clone(), BTreeMap::new()))
            .collect();

        IndexedCache {
            indexers: self.indexers,
            store: RwLock::new(Store {
                objects: BTreeMap::new(),
                indices,
            }),
            revision: AtomicU64::new(0),
            subscription_manager: Arc::new(SubscriptionManager::new(self.subscription_capacity)),
        }
    }
}

impl<V> IndexedCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn builder<F>(primary_key: F) -> IndexedCacheBuilder<V>
    where
        F: Fn(&V) -> Result<Option<String>> + Send + Sync + 'static,
    {
        let mut indexers: HashMap<String, KeyFn<V>> = HashMap::new();
        indexers.insert(PRIMARY_INDEX.to_string(), Arc::new(primary_key));
        IndexedCacheBuilder {
            indexers,
            subscription_capacity: SUBSCRIPTION_CHANNEL_CAPACITY,
        }
    }

    /// Number of persisted mutations since creation
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.objects.is_empty()
    }

    /// Object stored under the exact primary key
    pub async fn get_by_key(&self, key: &str) -> Option<V> {
        self.store.read().await.objects.get(key).cloned()
    }

    /// Primary keys starting with `prefix`, in order
    pub async fn keys(&self, prefix: &str) -> Vec<String> {
        let store = self.store.read().await;
        prefixed(&store.objects, prefix)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Objects whose primary key starts with `prefix`, in key order
    pub async fn values(&self, prefix: &str) -> Vec<V> {
        let store = self.store.read().await;
        prefixed(&store.objects, prefix)
            .map(|(_, value)| value.clone())
            .collect()
    }

    fn primary_key(&self, obj: &V) -> Result<String> {
        self.key_for(PRIMARY_INDEX, obj)?.ok_or_else(|| {
            CacheError::KeyNotGenerated {
                index: PRIMARY_INDEX.to_string(),
            }
            .into()
        })
    }

    fn key_for(&self, index: &str, obj: &V) -> Result<Option<String>> {
        let key_fn = self
            .indexers
            .get(index)
            .ok_or_else(|| CacheError::UnknownIndex(index.to_string()))?;
        key_fn(obj)
    }

    /// Secondary index keys for `obj`; indices with no key are skipped
    fn secondary_keys(&self, obj: &V) -> Result<Vec<(String, String)>> {
        let mut keys = Vec::new();
        for (name, key_fn) in &self.indexers {
            if name == PRIMARY_INDEX {
                continue;
            }
            if let Some(key) = key_fn(obj)? {
                keys.push((name.clone(), key));
            }
        }
        Ok(keys)
    }

    /// Stores `obj` under `primary`, replacing the index entries of whatever
    /// was there. Returns the displaced object.
    fn put(&self, store: &mut Store<V>, primary: &str, obj: V) -> Result<Option<V>> {
        let keys = self.secondary_keys(&obj)?;
        for (index, key) in &keys {
            if let Some(owner) = store.indices.get(index).and_then(|entries| entries.get(key)) {
                if owner != primary {
                    return Err(CacheError::IndexConflict {
                        index: index.clone(),
                        key: key.clone(),
                        owner: owner.clone(),
                    }
                    .into());
                }
            }
        }

        let previous = store.objects.remove(primary);
        if let Some(old) = &previous {
            self.unindex(store, old);
        }
        for (index, key) in keys {
            store
                .indices
                .entry(index)
                .or_default()
                .insert(key, primary.to_string());
        }
        store.objects.insert(primary.to_string(), obj);
        self.revision.fetch_add(1, Ordering::AcqRel);
        Ok(previous)
    }

    fn unindex(&self, store: &mut Store<V>, obj: &V) {
        // Index functions are deterministic; a failure now means the entry
        // was never indexed under that name.
        for (name, key_fn) in &self.indexers {
            if name == PRIMARY_INDEX {
                continue;
            }
            if let (Ok(Some(key)), Some(entries)) = (key_fn(obj), store.indices.get_mut(name)) {
                entries.remove(&key);
            }
        }
    }
}

fn prefixed<'a, T>(
    map: &'a BTreeMap<String, T>,
    prefix: &'a str,
) -> impl Iterator<Item = (&'a String, &'a T)> + 'a {
    map.range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(move |(key, _)| key.starts_with(prefix))
}

#[async_trait]
impl<V> Cache<V> for IndexedCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn key_creator(&self, index: &str) -> Result<KeyFn<V>> {
        self.indexers
            .get(index)
            .cloned()
            .ok_or_else(|| CacheError::UnknownIndex(index.to_string()).into())
    }

    #[allow(clippy::significant_drop_tightening)]
    async fn get(
        &self,
        index: &str,
        prefix: &str,
        visit: &mut (dyn for<'a> FnMut(&'a V) -> Result<ControlFlow<()>> + Send),
    ) -> Result<bool> {
        let store = self.store.read().await;
        let mut found = false;

        if index == PRIMARY_INDEX {
            for (_, obj) in prefixed(&store.objects, prefix) {
                found = true;
                if visit(obj)?.is_break() {
                    break;
                }
            }
            return Ok(found);
        }

        let entries = store
            .indices
            .get(index)
            .ok_or_else(|| CacheError::UnknownIndex(index.to_string()))?;
        for (_, primary) in prefixed(entries, prefix) {
            if let Some(obj) = store.objects.get(primary) {
                found = true;
                if visit(obj)?.is_break() {
                    break;
                }
            }
        }
        Ok(found)
    }

    async fn add(&self, obj: V) -> Result<()> {
        let key = self.primary_key(&obj)?;
        let previous = {
            let mut store = self.store.write().await;
            self.put(&mut store, &key, obj.clone())?
        };

        debug!("Cache STORE: {}", key);
        let change = if previous.is_some() {
            CacheChange::Updated { key, object: obj }
        } else {
            CacheChange::Added { key, object: obj }
        };
        self.subscription_manager.notify(&change).await;
        Ok(())
    }

    async fn delete(&self, obj: &V) -> Result<()> {
        let key = self.primary_key(obj)?;
        let removed = {
            let mut store = self.store.write().await;
            let removed = store.objects.remove(&key);
            if let Some(old) = &removed {
                self.unindex(&mut store, old);
                self.revision.fetch_add(1, Ordering::AcqRel);
            }
            removed
        };

        match removed {
            Some(object) => {
                debug!("Cache DELETE: {}", key);
                self.subscription_manager
                    .notify(&CacheChange::Deleted { key, object })
                    .await;
            }
            None => debug!("Cache DELETE of absent key {}", key),
        }
        Ok(())
    }

    async fn update(
        &self,
        existing: &V,
        mutator: &mut (dyn for<'a> FnMut(&'a V) -> Result<Option<V>> + Send),
    ) -> Result<bool> {
        let key = self.primary_key(existing)?;
        let replaced = {
            let mut store = self.store.write().await;
            let current = store
                .objects
                .get(&key)
                .ok_or_else(|| CacheError::NotFound(key.clone()))?;

            match mutator(current)? {
                None => None,
                Some(replacement) => {
                    let new_key = self.primary_key(&replacement)?;
                    if new_key != key {
                        return Err(CacheError::KeyChanged {
                            from: key,
                            to: new_key,
                        }
                        .into());
                    }
                    self.put(&mut store, &key, replacement.clone())?;
                    Some(replacement)
                }
            }
        };

        let Some(object) = replaced else {
            return Ok(false);
        };
        debug!("Cache UPDATE: {}", key);
        self.subscription_manager
            .notify(&CacheChange::Updated { key, object })
            .await;
        Ok(true)
    }
}
