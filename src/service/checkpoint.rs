//! Write-behind checkpoint
//!
//! Mutations only mark records dirty. `flush` reads the current in-memory
//! state of each dirty record and mirrors it to the store: present records
//! are saved, vanished ones deleted. A failed write leaves the record dirty
//! for the next flush.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ahash::AHashSet;

use crate::core::types::{ActorId, FactionId, FlagId};
use crate::faction::FactionRegistry;
use crate::ports::store::{PlayerRecord, Store, StoreError};
use crate::territory::CaptureEngine;

#[derive(Debug, Default)]
struct DirtySet {
    factions: AHashSet<FactionId>,
    flags: AHashSet<FlagId>,
    players: AHashSet<ActorId>,
}

impl DirtySet {
    fn len(&self) -> usize {
        self.factions.len() + self.flags.len() + self.players.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub failed: usize,
}

pub struct Checkpoint {
    store: Arc<dyn Store>,
    registry: Arc<FactionRegistry>,
    engine: Arc<CaptureEngine>,
    dirty: Mutex<DirtySet>,
    /// Serializes flushes so two never interleave writes
    flushing: Mutex<()>,
}

impl Checkpoint {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<FactionRegistry>,
        engine: Arc<CaptureEngine>,
    ) -> Self {
        Self {
            store,
            registry,
            engine,
            dirty: Mutex::new(DirtySet::default()),
            flushing: Mutex::new(()),
        }
    }

    fn dirty(&self) -> MutexGuard<'_, DirtySet> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_faction(&self, id: FactionId) {
        self.dirty().factions.insert(id);
    }

    pub fn mark_flag(&self, id: FlagId) {
        self.dirty().flags.insert(id);
    }

    pub fn mark_player(&self, actor: ActorId) {
        self.dirty().players.insert(actor);
    }

    pub fn mark_players(&self, actors: &[ActorId]) {
        self.dirty().players.extend(actors.iter().copied());
    }

    /// Records waiting to be written
    pub fn pending(&self) -> usize {
        self.dirty().len()
    }

    fn write_faction(&self, id: FactionId) -> Result<(), StoreError> {
        match self.registry.get(id) {
            Some(faction) => self.store.save_faction(&faction),
            None => self.store.delete_faction(id),
        }
    }

    fn write_flag(&self, id: FlagId) -> Result<(), StoreError> {
        match self.engine.flag(id) {
            Some(flag) => self.store.save_flag(&flag),
            None => self.store.delete_flag(id),
        }
    }

    /// Only the faction field is ours; everything else in the record is kept
    fn write_player(&self, actor: ActorId) -> Result<(), StoreError> {
        let mut record = self
            .store
            .load_player(actor)?
            .unwrap_or_else(|| PlayerRecord::new(actor));
        record.faction = self.registry.faction_id_of(actor);
        self.store.save_player(&record)
    }

    /// Mirror every dirty record to the store
    pub fn flush(&self) -> FlushReport {
        let _serial = self.flushing.lock().unwrap_or_else(PoisonError::into_inner);
        let batch = std::mem::take(&mut *self.dirty());
        if batch.is_empty() {
            return FlushReport::default();
        }

        let mut report = FlushReport::default();
        let mut retry = DirtySet::default();

        for id in batch.factions {
            match self.write_faction(id) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    tracing::warn!("Checkpoint of {} failed: {}", id, e);
                    retry.factions.insert(id);
                }
            }
        }
        for id in batch.flags {
            match self.write_flag(id) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    tracing::warn!("Checkpoint of {} failed: {}", id, e);
                    retry.flags.insert(id);
                }
            }
        }
        for actor in batch.players {
            match self.write_player(actor) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    tracing::warn!("Checkpoint of player {} failed: {}", actor, e);
                    retry.players.insert(actor);
                }
            }
        }

        report.failed = retry.len();
        if report.failed > 0 {
            let mut dirty = self.dirty();
            dirty.factions.extend(retry.factions);
            dirty.flags.extend(retry.flags);
            dirty.players.extend(retry.players);
        }
        tracing::debug!(
            "Checkpoint wrote {} records, {} left for retry",
            report.written,
            report.failed
        );
        report
    }
}
