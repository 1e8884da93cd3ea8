//! In-memory parcel progression records.
//!
//! Each parcel has a slot holding an `Arc` snapshot of its record behind a
//! short-lived `RwLock`, plus a mutation gate. Readers clone the `Arc` and
//! never wait on a mutation in progress. Writers for the same parcel are
//! serialized by the gate; writers for different parcels never contend
//! beyond the brief map lookup.
//!
//! A committed mutation is visible to the next read immediately and is
//! queued for persistence; the caller never waits for storage.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use isleforge_types::{ParcelGeneratorData, ParcelId};

use crate::error::StorageError;
use crate::persist::PersistHandle;

/// What a mutation closure decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation<T> {
    /// Keep the changes, stamp the record, and persist it.
    Commit(T),
    /// Discard the changes.
    Keep(T),
}

#[derive(Debug)]
struct ParcelSlot {
    gate: Mutex<()>,
    current: RwLock<Arc<ParcelGeneratorData>>,
}

impl ParcelSlot {
    fn new(data: ParcelGeneratorData) -> Self {
        Self {
            gate: Mutex::new(()),
            current: RwLock::new(Arc::new(data)),
        }
    }

    fn read(&self) -> Arc<ParcelGeneratorData> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Every parcel record the process knows about.
#[derive(Debug, Default)]
pub struct ParcelStore {
    parcels: RwLock<BTreeMap<ParcelId, Arc<ParcelSlot>>>,
    persist: Option<PersistHandle>,
}

impl ParcelStore {
    /// A store that queues committed records on `persist`, or keeps them in
    /// memory only when `None`.
    pub fn new(persist: Option<PersistHandle>) -> Self {
        Self {
            parcels: RwLock::new(BTreeMap::new()),
            persist,
        }
    }

    /// Load stored records. Existing entries are replaced. Returns the
    /// number of records loaded.
    pub fn hydrate(&self, records: impl IntoIterator<Item = ParcelGeneratorData>) -> usize {
        let mut parcels = self.parcels.write().unwrap_or_else(PoisonError::into_inner);
        let mut loaded = 0_usize;
        for record in records {
            parcels.insert(record.owner_id, Arc::new(ParcelSlot::new(record)));
            loaded = loaded.saturating_add(1);
        }
        tracing::info!(parcels = loaded, "Parcel records hydrated");
        loaded
    }

    fn slot(&self, parcel: ParcelId) -> Option<Arc<ParcelSlot>> {
        self.parcels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&parcel)
            .cloned()
    }

    fn slot_or_create(&self, parcel: ParcelId) -> Arc<ParcelSlot> {
        if let Some(slot) = self.slot(parcel) {
            return slot;
        }
        let mut parcels = self.parcels.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            parcels
                .entry(parcel)
                .or_insert_with(|| Arc::new(ParcelSlot::new(ParcelGeneratorData::new(parcel)))),
        )
    }

    fn is_current(&self, parcel: ParcelId, slot: &Arc<ParcelSlot>) -> bool {
        self.slot(parcel)
            .is_some_and(|current| Arc::ptr_eq(&current, slot))
    }

    /// The current record of `parcel`. An unknown parcel reads as an empty
    /// record without being created.
    pub fn snapshot(&self, parcel: ParcelId) -> Arc<ParcelGeneratorData> {
        self.slot(parcel).map_or_else(
            || Arc::new(ParcelGeneratorData::new(parcel)),
            |slot| slot.read(),
        )
    }

    /// Whether a record exists for `parcel`.
    pub fn contains(&self, parcel: ParcelId) -> bool {
        self.slot(parcel).is_some()
    }

    /// Number of known parcels.
    pub fn len(&self) -> usize {
        self.parcels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no parcel is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `mutate` on a copy of the parcel's record while holding the
    /// parcel's gate. On [`Mutation::Commit`] the copy replaces the record
    /// and is queued for saving. The record is created on first mutation.
    pub fn update<T>(
        &self,
        parcel: ParcelId,
        mutate: impl FnOnce(&mut ParcelGeneratorData) -> Mutation<T>,
    ) -> T {
        let slot = self.slot_or_create(parcel);
        let gate = slot.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_current(parcel, &slot) {
            // Wiped while we waited on the gate; start from a fresh record.
            drop(gate);
            return self.update(parcel, mutate);
        }

        let mut working = (*slot.read()).clone();
        match mutate(&mut working) {
            Mutation::Keep(value) => value,
            Mutation::Commit(value) => {
                working.touch();
                let committed = Arc::new(working);
                *slot.current.write().unwrap_or_else(PoisonError::into_inner) =
                    Arc::clone(&committed);
                self.queue_save(committed);
                value
            }
        }
    }

    /// Delete the record of `parcel` in memory and queue its deletion in
    /// storage. Returns whether a record existed.
    pub fn wipe(&self, parcel: ParcelId) -> bool {
        let Some(slot) = self.slot(parcel) else {
            return false;
        };
        let _gate = slot.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = self
            .parcels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&parcel)
            .is_some();
        if let Some(persist) = &self.persist {
            if let Err(e) = persist.delete(parcel) {
                tracing::warn!(parcel = %parcel, error = %e, "Could not queue parcel deletion");
            }
        }
        removed
    }

    /// Queue a save of every known record. Returns how many were queued.
    ///
    /// Each record is read and queued under its parcel's gate, so a full
    /// flush never lands behind a later commit or wipe of the same parcel.
    pub fn flush_all(&self) -> usize {
        let slots: Vec<(ParcelId, Arc<ParcelSlot>)> = self
            .parcels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(parcel, slot)| (*parcel, Arc::clone(slot)))
            .collect();
        let mut count = 0_usize;
        for (parcel, slot) in slots {
            let _gate = slot.gate.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.is_current(parcel, &slot) {
                continue;
            }
            self.queue_save(slot.read());
            count = count.saturating_add(1);
        }
        tracing::debug!(parcels = count, "Queued full flush");
        count
    }

    /// Wait until every queued persistence command has been processed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WriterClosed`] if the writer has stopped.
    pub async fn flush(&self) -> Result<(), StorageError> {
        match &self.persist {
            Some(persist) => persist.flush().await,
            None => Ok(()),
        }
    }

    fn queue_save(&self, record: Arc<ParcelGeneratorData>) {
        if let Some(persist) = &self.persist {
            let owner = record.owner_id;
            if let Err(e) = persist.save(record) {
                tracing::warn!(parcel = %owner, error = %e, "Could not queue parcel save");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use isleforge_types::TierId;

    use super::*;

    #[test]
    fn unknown_parcel_reads_empty_without_creating() {
        let store = ParcelStore::new(None);
        let parcel = ParcelId::new();
        let data = store.snapshot(parcel);
        assert_eq!(data.owner_id, parcel);
        assert!(data.active_tier_ids.is_empty());
        assert!(!store.contains(parcel));
    }

    #[test]
    fn committed_mutation_is_visible_immediately() {
        let store = ParcelStore::new(None);
        let parcel = ParcelId::new();
        let before = store.snapshot(parcel);

        let added = store.update(parcel, |data| {
            Mutation::Commit(data.unlocked_tier_ids.insert(TierId::new("iron")))
        });
        assert!(added);
        assert!(store.snapshot(parcel).has_unlocked(&TierId::new("iron")));
        assert!(!before.has_unlocked(&TierId::new("iron")));
    }

    #[test]
    fn kept_mutation_is_discarded() {
        let store = ParcelStore::new(None);
        let parcel = ParcelId::new();
        store.update(parcel, |data| {
            data.unlocked_tier_ids.insert(TierId::new("iron"));
            Mutation::Keep(())
        });
        assert!(!store.snapshot(parcel).has_unlocked(&TierId::new("iron")));
    }

    #[test]
    fn hydrate_and_wipe() {
        let store = ParcelStore::new(None);
        let record = ParcelGeneratorData::new(ParcelId::new());
        let parcel = record.owner_id;
        assert_eq!(store.hydrate([record]), 1);
        assert!(store.contains(parcel));
        assert!(store.wipe(parcel));
        assert!(!store.wipe(parcel));
        assert!(store.is_empty());
    }

    #[test]
    fn full_flush_skips_wiped_parcels() {
        let store = ParcelStore::new(None);
        let kept = ParcelId::new();
        let wiped = ParcelId::new();
        store.update(kept, |_| Mutation::Commit(()));
        store.update(wiped, |_| Mutation::Commit(()));
        assert!(store.wipe(wiped));
        assert_eq!(store.flush_all(), 1);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = Arc::new(ParcelStore::new(None));
        let parcel = ParcelId::new();
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        store.update(parcel, |data| {
                            Mutation::Commit(
                                data.unlocked_tier_ids.insert(TierId::new(format!("t{i}-{j}"))),
                            )
                        });
                    }
                })
            })
            .collect();
        for thread in threads {
            assert!(thread.join().is_ok());
        }
        assert_eq!(store.snapshot(parcel).unlocked_tier_ids.len(), 200);
    }
}
