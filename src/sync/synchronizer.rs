/**
 * Resource synchronizer
 *
 * Keeps every cache entry under one kind's key prefix consistent with a
 * remote collection: list, reconcile, then apply watch events until the
 * stream breaks, and start over.
 */
use super::collection::{ListOptions, RemoteCollection};
use super::config::SyncConfig;
use super::lifecycle::{Lifecycle, Phase, StoppedGuard};
use super::stats::{ReconcileStats, SyncStats};
use super::transform::{Transform, TypedResource};
use crate::cache::{Cache, CacheError, KeyFn, PRIMARY_INDEX};
use crate::error::{Error, Result};
use chrono::Utc;
use futures::StreamExt;
use kube::api::WatchEvent;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) struct Inner<K, V> {
    pub(crate) kind: String,
    pub(crate) key_prefix: String,
    pub(crate) cache: Arc<dyn Cache<V>>,
    pub(crate) collection: Arc<dyn RemoteCollection<K>>,
    pub(crate) transform: Arc<dyn Transform<K, V>>,
    pub(crate) options: ListOptions,
    pub(crate) config: SyncConfig,
    pub(crate) stats: RwLock<SyncStats>,
}

/// Mirrors one remote resource kind into a cache.
///
/// Built by [`SynchronizerBuilder`](super::SynchronizerBuilder); runs on its
/// own tokio task between [`start`](Self::start) and
/// [`shutdown`](Self::shutdown).
pub struct Synchronizer<K, V> {
    inner: Arc<Inner<K, V>>,
    lifecycle: Arc<Lifecycle>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<K, V> Synchronizer<K, V>
where
    K: TypedResource + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(inner: Inner<K, V>) -> Self {
        Self {
            inner: Arc::new(inner),
            lifecycle: Arc::new(Lifecycle::new()),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    #[must_use]
    pub fn options(&self) -> &ListOptions {
        &self.inner.options
    }

    /// Spawns the list+watch loop on the current tokio runtime
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyStarted` on a second call
    pub fn start(&mut self) -> Result<()> {
        if self.lifecycle.phase() != Phase::NotStarted {
            return Err(Error::AlreadyStarted);
        }
        self.lifecycle.advance(Phase::Listing);

        let inner = self.inner.clone();
        let lifecycle = self.lifecycle.clone();
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(async move {
            inner.run(&lifecycle, &cancel).await;
        }));
        Ok(())
    }

    /// Waits until the cache has been reconciled against the remote
    /// collection at least once. Returns immediately on every later call.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotStarted` before `start`, or `Error::Stopped` if the
    /// loop was shut down before its first reconciliation
    pub async fn await_ready(&self) -> Result<()> {
        self.lifecycle.wait_ready().await
    }

    /// Stops the loop and waits for it to exit. Interrupts a pending list or
    /// watch read. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Error::Join` if the loop task panicked
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        info!("{} - Shutdown requested", self.inner.kind);
        self.lifecycle.advance(Phase::Stopping);
        self.cancel.cancel();

        task.await.map_err(|e| {
            error!("{} - Synchronizer task failed: {}", self.inner.kind, e);
            Error::from(e)
        })
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.lifecycle.is_ready()
    }

    /// Shared handle for tasks that want to wait on readiness or termination
    #[must_use]
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        self.lifecycle.clone()
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.inner
            .stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<K, V> Drop for Synchronizer<K, V> {
    fn drop(&mut self) {
        // Dropped without shutdown: let the loop wind down on its own
        self.cancel.cancel();
    }
}

impl<K, V> Inner<K, V>
where
    K: TypedResource + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn run(&self, lifecycle: &Lifecycle, cancel: &CancellationToken) {
        let _stopped = StoppedGuard(lifecycle);
        info!("{} - Watching", self.kind);

        let mut failures = 0_u32;
        while !cancel.is_cancelled() {
            self.record(|stats| stats.cycles += 1);

            let result = self.run_cycle(lifecycle, cancel).await;
            let Err(e) = result else {
                break;
            };

            // A cycle that got as far as watching counts as a fresh start
            if lifecycle.phase() == Phase::Watching {
                failures = 0;
            }
            failures = failures.saturating_add(1);
            let delay = self.config.backoff(failures);
            self.record(|stats| {
                stats.restarts += 1;
                stats.last_error = Some(e.to_string());
            });

            match &e {
                Error::WatchClosed => info!("{} - Watch stream ended, restarting", self.kind),
                e if e.is_expired_token() => {
                    info!("{} - Resume token expired, relisting", self.kind);
                }
                e => warn!(
                    "{} - Restarting watch in {:?} (failure {}): {}",
                    self.kind, delay, failures, e
                ),
            }
            lifecycle.advance(Phase::Listing);

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = sleep(delay) => {}
            }
        }

        info!("{} - Watching stopped", self.kind);
    }

    /// One list, reconcile and watch pass. `Ok` only on shutdown.
    async fn run_cycle(&self, lifecycle: &Lifecycle, cancel: &CancellationToken) -> Result<()> {
        lifecycle.advance(Phase::Listing);

        let snapshot = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            snapshot = self.collection.list(&self.options) => snapshot?,
        };
        debug!(
            "{} - Listed {} objects at {}",
            self.kind,
            snapshot.items.len(),
            snapshot.resume_token
        );

        let reconciled = self.reconcile(snapshot.items).await?;
        info!(
            "{} - Cache initialised population added {}, updated {}, unchanged {}, stale {}",
            self.kind, reconciled.added, reconciled.updated, reconciled.unchanged, reconciled.stale
        );
        self.record(|stats| {
            stats.last_reconcile = Some(reconciled);
            stats.last_synced = Some(Utc::now());
        });

        let stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            stream = self.collection.watch(&self.options, &snapshot.resume_token) => stream,
        };
        if lifecycle.mark_ready() {
            info!("{} - Ready", self.kind);
        }
        let mut stream = stream?;
        lifecycle.advance(Phase::Watching);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("{} - Shutdown received", self.kind);
                    return Ok(());
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => self.apply(event).await?,
                    Some(Err(e)) => return Err(e),
                    None => return Err(Error::WatchClosed),
                },
            }
        }
    }

    /// Makes the cache entries under this kind's prefix match `items`
    pub(crate) async fn reconcile(&self, items: Vec<K>) -> Result<ReconcileStats> {
        let key_of = self.cache.key_creator(PRIMARY_INDEX)?;

        let mut current: HashMap<String, V> = HashMap::new();
        self.cache
            .get(PRIMARY_INDEX, &self.key_prefix, &mut |obj: &V| {
                let key = generated_key(&key_of, obj)?;
                current.insert(key, obj.clone());
                Ok(ControlFlow::Continue(()))
            })
            .await?;

        // Every key is checked before the cache is touched
        let mut listed = Vec::with_capacity(items.len());
        for mut item in items {
            item.ensure_kind(&self.kind);
            let candidate = self.transform.create(item.clone());
            let key = self.owned_key(&key_of, &candidate)?;
            listed.push((key, item, candidate));
        }

        let mut stats = ReconcileStats::default();
        for (key, item, candidate) in listed {
            if let Some(existing) = current.remove(&key) {
                if self.merge(&existing, &item).await? {
                    stats.updated += 1;
                } else {
                    stats.unchanged += 1;
                }
            } else {
                self.cache.add(candidate).await?;
                stats.added += 1;
            }
        }

        // Whatever was not listed no longer exists remotely
        for stale in current.values() {
            self.cache.delete(stale).await?;
            stats.stale += 1;
        }

        Ok(stats)
    }

    /// Merges `incoming` into the cached counterpart of `existing`; persists
    /// only when the transform reports a change
    async fn merge(&self, existing: &V, incoming: &K) -> Result<bool> {
        let transform = &self.transform;
        self.cache
            .update(existing, &mut |current: &V| {
                let mut merged = current.clone();
                Ok(transform.update(incoming, &mut merged).then_some(merged))
            })
            .await
    }

    async fn apply(&self, event: WatchEvent<K>) -> Result<()> {
        match event {
            WatchEvent::Added(mut obj) => {
                obj.ensure_kind(&self.kind);
                debug!("{} - Received event type ADDED", self.kind);
                let candidate = self.transform.create(obj);
                self.check_owned(&candidate)?;
                self.cache.add(candidate).await?;
                self.record(|stats| stats.events.added += 1);
            }
            WatchEvent::Modified(mut obj) => {
                obj.ensure_kind(&self.kind);
                debug!("{} - Received event type MODIFIED", self.kind);
                let candidate = self.transform.create(obj.clone());
                self.check_owned(&candidate)?;
                let merged = self.merge(&candidate, &obj).await;
                match merged {
                    Ok(true) => self.record(|stats| stats.events.updated += 1),
                    Ok(false) => self.record(|stats| stats.events.unchanged += 1),
                    Err(Error::Cache(CacheError::NotFound(key))) => {
                        debug!("{} - Modified object {} was not cached, adding", self.kind, key);
                        self.cache.add(candidate).await?;
                        self.record(|stats| stats.events.added += 1);
                    }
                    Err(e) => return Err(e),
                }
            }
            WatchEvent::Deleted(mut obj) => {
                obj.ensure_kind(&self.kind);
                debug!("{} - Received event type DELETED", self.kind);
                let candidate = self.transform.create(obj);
                self.check_owned(&candidate)?;
                self.cache.delete(&candidate).await?;
                self.record(|stats| stats.events.deleted += 1);
            }
            WatchEvent::Bookmark(bookmark) => {
                debug!(
                    "{} - Bookmark at {}",
                    self.kind, bookmark.metadata.resource_version
                );
            }
            WatchEvent::Error(status) => {
                return Err(Error::WatchEvent {
                    code: status.code,
                    reason: status.reason,
                    message: status.message,
                });
            }
        }
        Ok(())
    }

    /// Primary key of `obj`, which must fall under this synchronizer's
    /// prefix; anything else would escape stale detection
    fn owned_key(&self, key_of: &KeyFn<V>, obj: &V) -> Result<String> {
        let key = generated_key(key_of, obj)?;
        if !key.starts_with(&self.key_prefix) {
            return Err(CacheError::KeyOutsidePrefix {
                key,
                prefix: self.key_prefix.clone(),
            }
            .into());
        }
        Ok(key)
    }

    fn check_owned(&self, obj: &V) -> Result<()> {
        let key_of = self.cache.key_creator(PRIMARY_INDEX)?;
        self.owned_key(&key_of, obj).map(|_| ())
    }

    fn record(&self, update: impl FnOnce(&mut SyncStats)) {
        let mut stats = self.stats.write().unwrap_or_else(|poisoned| {
            warn!("{} - Stats lock poisoned, recovering", self.kind);
            poisoned.into_inner()
        });
        update(&mut stats);
    }
}

/// Strict key derivation: an object the primary index cannot key is a
/// cache misconfiguration, not something to skip
fn generated_key<V>(key_of: &KeyFn<V>, obj: &V) -> Result<String> {
    key_of(obj)?.ok_or_else(|| {
        CacheError::KeyNotGenerated {
            index: PRIMARY_INDEX.to_string(),
        }
        .into()
    })
}
