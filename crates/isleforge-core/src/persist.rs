//! Asynchronous persistence of parcel records.
//!
//! Callers never wait for storage. A mutation updates memory, then queues a
//! [`PersistCommand`] on an unbounded channel consumed by a single writer
//! task. The writer retries failed saves with exponential backoff and, once
//! the attempts are exhausted, logs the failure and moves on. It never
//! touches in-memory state: memory is the source of truth and storage
//! follows it.
//!
//! # Architecture
//!
//! ```text
//! ParcelStore::update ──► PersistHandle ──► mpsc ──► writer task ──► GeneratorRepository
//!                                                       │
//!                               PersistHandle::flush ◄──┘ (oneshot ack)
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use isleforge_catalog::CatalogDocument;
use isleforge_types::{ParcelGeneratorData, ParcelId};

use crate::config::StorageConfig;
use crate::error::StorageError;

/// Durable storage for parcel records and the stored catalog.
pub trait GeneratorRepository: Send + Sync + 'static {
    /// Every stored parcel record.
    fn load_parcels(
        &self,
    ) -> impl Future<Output = Result<Vec<ParcelGeneratorData>, StorageError>> + Send;

    /// Insert or replace one parcel record.
    fn save_parcel(
        &self,
        record: &ParcelGeneratorData,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Delete the record of `owner`. Deleting a missing record succeeds.
    fn delete_parcel(
        &self,
        owner: ParcelId,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// The stored catalog document, if the backend holds one.
    fn load_catalog(
        &self,
    ) -> impl Future<Output = Result<Option<CatalogDocument>, StorageError>> + Send;
}

/// A unit of work for the writer task.
#[derive(Debug)]
pub enum PersistCommand {
    /// Save this snapshot of a parcel record.
    Save(Arc<ParcelGeneratorData>),
    /// Delete a parcel record.
    Delete(ParcelId),
    /// Acknowledge once every earlier command has been processed.
    Flush(oneshot::Sender<()>),
}

/// Retry behavior for failed saves and deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per command (at least 1).
    pub attempts: u32,
    /// Delay before the first retry; doubled for every further retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Build a policy from the storage configuration.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            attempts: config.save_retry_attempts.max(1),
            backoff: Duration::from_millis(config.save_retry_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1_u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

/// Counters returned by the writer task when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Records saved.
    pub saved: u64,
    /// Records deleted.
    pub deleted: u64,
    /// Commands dropped after exhausting their attempts.
    pub failed: u64,
    /// Extra attempts made after a failure.
    pub retries: u64,
}

/// Sending side of the writer channel.
#[derive(Debug, Clone)]
pub struct PersistHandle {
    tx: mpsc::UnboundedSender<PersistCommand>,
}

impl PersistHandle {
    /// Queue a save of `record`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WriterClosed`] if the writer has stopped.
    pub fn save(&self, record: Arc<ParcelGeneratorData>) -> Result<(), StorageError> {
        self.send(PersistCommand::Save(record))
    }

    /// Queue a delete of `owner`'s record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WriterClosed`] if the writer has stopped.
    pub fn delete(&self, owner: ParcelId) -> Result<(), StorageError> {
        self.send(PersistCommand::Delete(owner))
    }

    /// Wait until every command queued before this call was processed
    /// (saved, or dropped after its last attempt).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WriterClosed`] if the writer has stopped.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let (done, ack) = oneshot::channel();
        self.send(PersistCommand::Flush(done))?;
        ack.await.or(Err(StorageError::WriterClosed))
    }

    fn send(&self, command: PersistCommand) -> Result<(), StorageError> {
        if self.tx.send(command).is_err() {
            return Err(StorageError::WriterClosed);
        }
        Ok(())
    }
}

/// Spawn the writer task on the current Tokio runtime.
///
/// The task ends when every [`PersistHandle`] has been dropped and the queue
/// is drained, and returns its counters.
pub fn spawn_writer<R: GeneratorRepository>(
    repository: Arc<R>,
    policy: RetryPolicy,
) -> (PersistHandle, JoinHandle<WriterStats>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_writer(repository, policy, rx));
    tracing::info!(
        attempts = policy.attempts,
        backoff_ms = u64::try_from(policy.backoff.as_millis()).unwrap_or(u64::MAX),
        "Persistence writer spawned"
    );
    (PersistHandle { tx }, handle)
}

async fn run_writer<R: GeneratorRepository>(
    repository: Arc<R>,
    policy: RetryPolicy,
    mut rx: mpsc::UnboundedReceiver<PersistCommand>,
) -> WriterStats {
    let mut stats = WriterStats::default();
    while let Some(command) = rx.recv().await {
        match command {
            PersistCommand::Save(record) => {
                let owner = record.owner_id;
                let ok = with_retry(policy, &mut stats, "save", owner, || {
                    repository.save_parcel(&record)
                })
                .await;
                if ok {
                    stats.saved = stats.saved.saturating_add(1);
                    tracing::debug!(parcel = %owner, "Parcel record saved");
                }
            }
            PersistCommand::Delete(owner) => {
                let ok = with_retry(policy, &mut stats, "delete", owner, || {
                    repository.delete_parcel(owner)
                })
                .await;
                if ok {
                    stats.deleted = stats.deleted.saturating_add(1);
                    tracing::debug!(parcel = %owner, "Parcel record deleted");
                }
            }
            PersistCommand::Flush(done) => {
                if done.send(()).is_err() {
                    tracing::debug!("Flush requester went away before acknowledgement");
                }
            }
        }
    }
    tracing::info!(
        saved = stats.saved,
        deleted = stats.deleted,
        failed = stats.failed,
        retries = stats.retries,
        "Persistence writer stopped"
    );
    stats
}

async fn with_retry<F, Fut>(
    policy: RetryPolicy,
    stats: &mut WriterStats,
    operation: &'static str,
    owner: ParcelId,
    mut attempt: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), StorageError>>,
{
    let mut tries = 0_u32;
    loop {
        tries = tries.saturating_add(1);
        match attempt().await {
            Ok(()) => return true,
            Err(e) if tries < policy.attempts => {
                tracing::warn!(
                    parcel = %owner,
                    operation,
                    attempt = tries,
                    error = %e,
                    "Persistence attempt failed, retrying"
                );
                stats.retries = stats.retries.saturating_add(1);
                tokio::time::sleep(policy.delay(tries)).await;
            }
            Err(e) => {
                tracing::error!(
                    parcel = %owner,
                    operation,
                    attempts = tries,
                    error = %e,
                    "Persistence failed, in-memory state kept"
                );
                stats.failed = stats.failed.saturating_add(1);
                return false;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryRepository
// ---------------------------------------------------------------------------

/// A [`GeneratorRepository`] held in memory, with save-failure injection.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    parcels: Mutex<BTreeMap<ParcelId, ParcelGeneratorData>>,
    catalog: Mutex<Option<CatalogDocument>>,
    failing_saves: AtomicU32,
    save_attempts: AtomicU64,
}

impl MemoryRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository pre-filled with `records`.
    pub fn with_parcels(records: impl IntoIterator<Item = ParcelGeneratorData>) -> Self {
        let repository = Self::new();
        {
            let mut parcels = repository
                .parcels
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for record in records {
                parcels.insert(record.owner_id, record);
            }
        }
        repository
    }

    /// Store a catalog document to be returned by `load_catalog`.
    pub fn set_catalog(&self, document: CatalogDocument) {
        *self.catalog.lock().unwrap_or_else(PoisonError::into_inner) = Some(document);
    }

    /// Make the next `count` save attempts fail.
    pub fn fail_next_saves(&self, count: u32) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// The stored record of `owner`.
    pub fn stored(&self, owner: ParcelId) -> Option<ParcelGeneratorData> {
        self.parcels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&owner)
            .cloned()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.parcels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no record is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Save attempts made so far, failed ones included.
    pub fn save_attempts(&self) -> u64 {
        self.save_attempts.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl GeneratorRepository for MemoryRepository {
    fn load_parcels(
        &self,
    ) -> impl Future<Output = Result<Vec<ParcelGeneratorData>, StorageError>> + Send {
        let records = self
            .parcels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        std::future::ready(Ok(records))
    }

    fn save_parcel(
        &self,
        record: &ParcelGeneratorData,
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        let result = if self.take_failure() {
            Err(StorageError::Backend {
                message: "injected save failure".to_owned(),
            })
        } else {
            self.parcels
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(record.owner_id, record.clone());
            Ok(())
        };
        std::future::ready(result)
    }

    fn delete_parcel(
        &self,
        owner: ParcelId,
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        self.parcels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&owner);
        std::future::ready(Ok(()))
    }

    fn load_catalog(
        &self,
    ) -> impl Future<Output = Result<Option<CatalogDocument>, StorageError>> + Send {
        let document = self
            .catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        std::future::ready(Ok(document))
    }
}
