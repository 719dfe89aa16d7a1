use super::collection::{ListOptions, RemoteCollection};
use super::config::SyncConfig;
use super::stats::SyncStats;
use super::synchronizer::{Inner, Synchronizer};
use super::transform::{Identity, Transform, TypedResource};
use crate::cache::Cache;
use crate::error::{Error, Result};
use std::sync::{Arc, RwLock};

/// A single configuration change, for callers that assemble overrides as
/// data. Applied in order by [`SynchronizerBuilder::apply`].
pub enum SyncOverride<K, V> {
    Collection(Arc<dyn RemoteCollection<K>>),
    /// `None` watches all namespaces
    Namespace(Option<String>),
    LabelSelector(String),
    FieldSelector(String),
    Transform(Arc<dyn Transform<K, V>>),
    Config(SyncConfig),
}

/// Assembles a [`Synchronizer`] for one resource kind.
///
/// Defaults: all namespaces, the [`Identity`] transform, keys under
/// `"<kind>/"`, and [`SyncConfig::default`]. A remote collection is required.
pub struct SynchronizerBuilder<K, V> {
    kind: String,
    cache: Arc<dyn Cache<V>>,
    collection: Option<Arc<dyn RemoteCollection<K>>>,
    transform: Arc<dyn Transform<K, V>>,
    options: ListOptions,
    key_prefix: Option<String>,
    config: SyncConfig,
}

impl<K> SynchronizerBuilder<K, K>
where
    K: TypedResource + Clone + PartialEq + Send + Sync + 'static,
{
    /// Caches remote objects as received, replacing them on any change
    pub fn new(cache: Arc<dyn Cache<K>>, kind: impl Into<String>) -> Self {
        Self::with_transform(cache, kind, Identity)
    }
}

impl<K, V> SynchronizerBuilder<K, V>
where
    K: TypedResource + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn with_transform(
        cache: Arc<dyn Cache<V>>,
        kind: impl Into<String>,
        transform: impl Transform<K, V> + 'static,
    ) -> Self {
        Self {
            kind: kind.into(),
            cache,
            collection: None,
            transform: Arc::new(transform),
            options: ListOptions::default(),
            key_prefix: None,
            config: SyncConfig::default(),
        }
    }

    #[must_use]
    pub fn collection(self, collection: impl RemoteCollection<K> + 'static) -> Self {
        self.shared_collection(Arc::new(collection))
    }

    #[must_use]
    pub fn shared_collection(mut self, collection: Arc<dyn RemoteCollection<K>>) -> Self {
        self.collection = Some(collection);
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.options.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn all_namespaces(mut self) -> Self {
        self.options.namespace = None;
        self
    }

    #[must_use]
    pub fn label_selector(mut self, selector: impl Into<String>) -> Self {
        self.options.label_selector = Some(selector.into());
        self
    }

    #[must_use]
    pub fn field_selector(mut self, selector: impl Into<String>) -> Self {
        self.options.field_selector = Some(selector.into());
        self
    }

    #[must_use]
    pub fn transform(mut self, transform: impl Transform<K, V> + 'static) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    /// Cache key prefix owned by this synchronizer. Every key the primary
    /// index produces for this kind must start with it.
    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Applies `overrides` in order; later ones win
    #[must_use]
    pub fn apply(mut self, overrides: impl IntoIterator<Item = SyncOverride<K, V>>) -> Self {
        for change in overrides {
            match change {
                SyncOverride::Collection(collection) => self.collection = Some(collection),
                SyncOverride::Namespace(namespace) => self.options.namespace = namespace,
                SyncOverride::LabelSelector(selector) => {
                    self.options.label_selector = Some(selector);
                }
                SyncOverride::FieldSelector(selector) => {
                    self.options.field_selector = Some(selector);
                }
                SyncOverride::Transform(transform) => self.transform = transform,
                SyncOverride::Config(config) => self.config = config,
            }
        }
        self
    }

    /// # Errors
    ///
    /// Returns `Error::MissingCollection` if no remote collection was supplied
    pub fn build(self) -> Result<Synchronizer<K, V>> {
        let collection = self.collection.ok_or(Error::MissingCollection)?;
        let key_prefix = self
            .key_prefix
            .unwrap_or_else(|| format!("{}/", self.kind));

        Ok(Synchronizer::new(Inner {
            kind: self.kind,
            key_prefix,
            cache: self.cache,
            collection,
            transform: self.transform,
            options: self.options,
            config: self.config,
            stats: RwLock::new(SyncStats::default()),
        }))
    }
}
