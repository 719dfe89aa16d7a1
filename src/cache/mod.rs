/**
 * Keyed cache contract consumed by the synchronizer, plus an in-memory
 * implementation with named indices and change subscriptions.
 */
pub mod errors;
pub mod indexed_cache;
pub mod subscription;

pub use errors::CacheError;
pub use indexed_cache::{IndexedCache, IndexedCacheBuilder};
pub use subscription::{CacheChange, Subscription, SubscriptionManager};

use crate::error::Result;
use async_trait::async_trait;
use std::ops::ControlFlow;
use std::sync::Arc;

/// Name of the index every cache must provide; its keys are unique per object
pub const PRIMARY_INDEX: &str = "primary";

/// Derives an index key for an object. `Ok(None)` means the index has no key
/// for that object.
pub type KeyFn<V> = Arc<dyn Fn(&V) -> Result<Option<String>> + Send + Sync>;

/// Capabilities the synchronizer needs from a cache.
///
/// Implementations do their own locking; every method may be called
/// concurrently from several synchronizers and readers.
#[async_trait]
pub trait Cache<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Key function backing the named index
    ///
    /// # Errors
    ///
    /// Returns `CacheError::UnknownIndex` if no such index exists
    fn key_creator(&self, index: &str) -> Result<KeyFn<V>>;

    /// Visits every object whose `index` key starts with `prefix`, in key
    /// order, until `visit` breaks. Returns whether anything matched.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown index or the first error from `visit`
    async fn get(
        &self,
        index: &str,
        prefix: &str,
        visit: &mut (dyn for<'a> FnMut(&'a V) -> Result<ControlFlow<()>> + Send),
    ) -> Result<bool>;

    /// Inserts `obj`, replacing any object with the same primary key
    ///
    /// # Errors
    ///
    /// Returns an error if a key cannot be derived for `obj`
    async fn add(&self, obj: V) -> Result<()>;

    /// Removes the object sharing `obj`'s primary key, if present
    ///
    /// # Errors
    ///
    /// Returns an error if a key cannot be derived for `obj`
    async fn delete(&self, obj: &V) -> Result<()>;

    /// Runs `mutator` against the stored object sharing `existing`'s primary
    /// key. A `Some` result replaces it; `None` leaves the cache untouched.
    /// Returns whether a replacement was persisted.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::NotFound` if nothing is stored under the key, or
    /// the error returned by `mutator`
    async fn update(
        &self,
        existing: &V,
        mutator: &mut (dyn for<'a> FnMut(&'a V) -> Result<Option<V>> + Send),
    ) -> Result<bool>;
}
