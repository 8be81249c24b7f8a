//! Per-repository event lanes
//!
//! Every repository key gets its own lane: a bounded queue drained by one
//! task, so events for a key are applied strictly in arrival order while
//! different keys proceed in parallel. Lanes are created on the first event
//! and torn down as soon as their queue drains.
//!
//! Each lane carries an epoch token. Submitting a `Deleted` event cancels the
//! current epoch immediately, before the event is queued: the in-flight fetch
//! aborts at its next I/O boundary, queued creates/updates of that epoch are
//! skipped, and a fetch that still manages to complete is discarded. The
//! delete itself then removes the cache entry and the owned secret.
//!
//! Per key, events must be submitted by a single producer (the watch loop);
//! ordering across concurrent producers for the same key is not defined.

use chartdex_repo::{
    DEFAULT_MAX_INDEX_SIZE, IndexCacheEntry, IndexFetcher, IndexStore, NormalizedIndex, RepoError,
    RepositoryRef,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::cluster::SecretApi;
use crate::credentials::CredentialResolver;
use crate::error::{KubeError, Result};
use crate::resources::HelmRepository;
use crate::retry::{RetryPolicy, retry_transient};
use crate::status::{self, StatusReason};

/// A change observed on a repository object
#[derive(Debug, Clone)]
pub enum RepositoryEvent {
    Created(HelmRepository),
    Updated(HelmRepository),
    /// Carries the last known state of the object
    Deleted(HelmRepository),
}

impl RepositoryEvent {
    pub fn key(&self) -> RepositoryRef {
        self.repository().key()
    }

    pub fn repository(&self) -> &HelmRepository {
        match self {
            RepositoryEvent::Created(r) | RepositoryEvent::Updated(r) | RepositoryEvent::Deleted(r) => r,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RepositoryEvent::Created(_) => "created",
            RepositoryEvent::Updated(_) => "updated",
            RepositoryEvent::Deleted(_) => "deleted",
        }
    }
}

/// Last lane-local failure for a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneFailure {
    /// Version of the object the failed fetch was for
    pub version_token: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Global bound on concurrently running fetches
    pub max_concurrent_fetches: usize,
    /// Per-lane queue bound; `submit` waits when it is reached
    pub lane_queue_capacity: usize,
    /// Used when the object does not set its own timeout
    pub fetch_timeout: Duration,
    pub max_index_size: Option<u64>,
    /// Backoff for the cache and secret cleanup of a deleted repository
    pub cleanup_retry: RetryPolicy,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 10,
            lane_queue_capacity: 64,
            fetch_timeout: Duration::from_secs(120),
            max_index_size: Some(DEFAULT_MAX_INDEX_SIZE),
            cleanup_retry: RetryPolicy::default(),
        }
    }
}

struct LaneMessage {
    event: RepositoryEvent,
    cancel: CancellationToken,
}

struct LaneHandle {
    tx: mpsc::Sender<LaneMessage>,
    /// Messages submitted but not yet fully processed
    pending: usize,
    epoch: CancellationToken,
}

struct Inner {
    store: Arc<dyn IndexStore>,
    fetcher: Arc<dyn IndexFetcher>,
    resolver: CredentialResolver,
    config: SequencerConfig,
    fetch_permits: Semaphore,
    lanes: Mutex<HashMap<RepositoryRef, LaneHandle>>,
    failures: RwLock<HashMap<RepositoryRef, LaneFailure>>,
    idle: Notify,
    shutdown: CancellationToken,
}

/// Routes repository events into per-key lanes
#[derive(Clone)]
pub struct Sequencer {
    inner: Arc<Inner>,
}

impl Sequencer {
    pub fn new(
        store: Arc<dyn IndexStore>,
        fetcher: Arc<dyn IndexFetcher>,
        secrets: Arc<dyn SecretApi>,
        config: SequencerConfig,
    ) -> Self {
        let permits = config.max_concurrent_fetches.max(1);
        Self {
            inner: Arc::new(Inner {
                store,
                fetcher,
                resolver: CredentialResolver::new(secrets),
                config,
                fetch_permits: Semaphore::new(permits),
                lanes: Mutex::new(HashMap::new()),
                failures: RwLock::new(HashMap::new()),
                idle: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Queue an event on its key's lane
    ///
    /// Waits while the lane's queue is full. A `Deleted` event cancels the
    /// lane's current work before this returns.
    pub async fn submit(&self, event: RepositoryEvent) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(KubeError::ShuttingDown);
        }

        let key = event.key();
        let (tx, cancel) = {
            let mut lanes = self.inner.lock_lanes();
            let handle = lanes
                .entry(key.clone())
                .or_insert_with(|| self.spawn_lane(key.clone()));

            if matches!(event, RepositoryEvent::Deleted(_)) {
                handle.epoch.cancel();
                handle.epoch = self.inner.shutdown.child_token();
            }
            handle.pending += 1;
            (handle.tx.clone(), handle.epoch.clone())
        };

        // Hands the slot back if this future is dropped while the queue is full
        let mut slot = PendingSlot {
            inner: self.inner.as_ref(),
            key: &key,
            armed: true,
        };
        tracing::debug!(key = %key, event = event.kind(), "queued repository event");
        if tx.send(LaneMessage { event, cancel }).await.is_err() {
            return Err(KubeError::ShuttingDown);
        }
        slot.armed = false;
        Ok(())
    }

    fn spawn_lane(&self, key: RepositoryRef) -> LaneHandle {
        let (tx, rx) = mpsc::channel(self.inner.config.lane_queue_capacity.max(1));
        tokio::spawn(run_lane(self.inner.clone(), key, rx));
        LaneHandle {
            tx,
            pending: 0,
            epoch: self.inner.shutdown.child_token(),
        }
    }

    /// Resolves once every lane has drained and been torn down
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.lane_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Number of live lanes
    pub fn lane_count(&self) -> usize {
        self.inner.lock_lanes().len()
    }

    /// Last fetch failure recorded for `key`, if it has not been cleared since
    pub fn failure(&self, key: &RepositoryRef) -> Option<LaneFailure> {
        self.inner
            .failures
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn store(&self) -> Arc<dyn IndexStore> {
        self.inner.store.clone()
    }

    /// Stop accepting events and cancel all in-flight fetches
    ///
    /// Already queued events still drain; creates and updates among them
    /// are skipped.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

/// A `pending` count taken by `submit` and not yet matched by a queued message
struct PendingSlot<'a> {
    inner: &'a Inner,
    key: &'a RepositoryRef,
    armed: bool,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.finish_one(self.key);
        }
    }
}

async fn run_lane(inner: Arc<Inner>, key: RepositoryRef, mut rx: mpsc::Receiver<LaneMessage>) {
    tracing::debug!(key = %key, "lane started");
    while let Some(message) = rx.recv().await {
        inner.process(&key, message).await;
        if inner.finish_one(&key) {
            break;
        }
    }
    tracing::debug!(key = %key, "lane stopped");
}

impl Inner {
    fn lock_lanes(&self) -> MutexGuard<'_, HashMap<RepositoryRef, LaneHandle>> {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Account for one processed message; returns true when the lane was torn down
    ///
    /// A zero pending count under the lock means no submitter holds a sender
    /// it has not used yet, so the lane can go.
    fn finish_one(&self, key: &RepositoryRef) -> bool {
        let mut lanes = self.lock_lanes();
        let Some(handle) = lanes.get_mut(key) else {
            return true;
        };
        handle.pending = handle.pending.saturating_sub(1);
        if handle.pending > 0 {
            return false;
        }
        lanes.remove(key);
        if lanes.is_empty() {
            self.idle.notify_waiters();
        }
        true
    }

    async fn process(&self, key: &RepositoryRef, message: LaneMessage) {
        let LaneMessage { event, cancel } = message;
        match event {
            RepositoryEvent::Created(repo) | RepositoryEvent::Updated(repo) => {
                if let Err(e) = self.apply(key, &repo, &cancel).await {
                    tracing::warn!(key = %key, "failed to index repository: {}", e);
                    self.record_failure(key, &repo, &e);
                }
            }
            RepositoryEvent::Deleted(repo) => {
                if let Err(e) = self.remove(key, &repo).await {
                    tracing::warn!(key = %key, "failed to clean up deleted repository: {}", e);
                }
            }
        }
    }

    async fn apply(
        &self,
        key: &RepositoryRef,
        repo: &HelmRepository,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            tracing::debug!(key = %key, "skipping event superseded by a delete");
            return Ok(());
        }

        let status = status::reconciled(repo);
        match status.reason {
            StatusReason::Pending => {
                tracing::debug!(key = %key, "repository not reconciled yet: {}", status.user_message);
                Ok(())
            }
            StatusReason::Failed => {
                self.clear_failure(key);
                if self.store.delete(key).await? {
                    tracing::info!(key = %key, "removed index of failed repository");
                }
                Ok(())
            }
            StatusReason::Succeeded => self.refresh(key, repo, cancel).await,
        }
    }

    async fn refresh(
        &self,
        key: &RepositoryRef,
        repo: &HelmRepository,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let token = repo.version_token();
        if self.store.source_version(key).await?.as_deref() == Some(token.as_str()) {
            tracing::debug!(key = %key, version = %token, "index already cached");
            return Ok(());
        }

        let index = match self.fetch(repo, cancel).await {
            Ok(index) => index,
            Err(KubeError::Repo(RepoError::Cancelled)) => {
                tracing::debug!(key = %key, "fetch cancelled");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // A delete may have arrived while the fetch was finishing
        if cancel.is_cancelled() {
            tracing::debug!(key = %key, "discarding index fetched for a deleted repository");
            return Ok(());
        }

        let packages = index.package_count();
        self.store
            .put(IndexCacheEntry::new(key.clone(), index, token.clone()))
            .await?;
        self.clear_failure(key);
        tracing::info!(key = %key, version = %token, packages, "cached repository index");
        Ok(())
    }

    async fn fetch(
        &self,
        repo: &HelmRepository,
        cancel: &CancellationToken,
    ) -> Result<NormalizedIndex> {
        let auth = self.resolver.resolve(repo).await?;
        let source = repo.fetch_source(self.config.fetch_timeout, self.config.max_index_size);

        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(RepoError::Cancelled.into()),
            permit = self.fetch_permits.acquire() => permit.map_err(|_| KubeError::ShuttingDown)?,
        };
        Ok(self.fetcher.fetch(&source, &auth, cancel).await?)
    }

    async fn remove(&self, key: &RepositoryRef, repo: &HelmRepository) -> Result<()> {
        self.clear_failure(key);
        let policy = &self.config.cleanup_retry;
        let removed = retry_transient(policy, "remove cached index", || async {
            Ok(self.store.delete(key).await?)
        })
        .await?;
        let secret_removed = retry_transient(policy, "remove owned secret", || {
            self.resolver.delete_owned(repo)
        })
        .await?;
        tracing::info!(key = %key, removed, secret_removed, "repository removed");
        Ok(())
    }

    fn record_failure(&self, key: &RepositoryRef, repo: &HelmRepository, error: &KubeError) {
        let failure = LaneFailure {
            version_token: repo.version_token(),
            message: error.to_string(),
        };
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), failure);
    }

    fn clear_failure(&self, key: &RepositoryRef) {
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}
