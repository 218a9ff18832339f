//! Persistence collaborator - a checkpoint, not the source of truth

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{ActorId, FactionId, FlagId};
use crate::faction::Faction;
use crate::territory::Flag;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Per-actor data. Only `faction` is owned by this crate; the rest belongs
/// to the economy/class systems and must be preserved on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub actor: ActorId,
    #[serde(default)]
    pub faction: Option<FactionId>,
    #[serde(default)]
    pub gold: u64,
    #[serde(default)]
    pub class: Option<String>,
}

impl PlayerRecord {
    pub fn new(actor: ActorId) -> Self {
        Self {
            actor,
            faction: None,
            gold: 0,
            class: None,
        }
    }
}

/// Durable storage for factions, flags and players.
///
/// Calls may block on I/O; the service only issues them from the
/// checkpoint job, never from the request path.
pub trait Store: Send + Sync {
    fn save_faction(&self, faction: &Faction) -> Result<(), StoreError>;
    fn delete_faction(&self, id: FactionId) -> Result<(), StoreError>;
    fn load_all_factions(&self) -> Result<Vec<Faction>, StoreError>;

    fn save_flag(&self, flag: &Flag) -> Result<(), StoreError>;
    fn delete_flag(&self, id: FlagId) -> Result<(), StoreError>;
    fn load_all_flags(&self) -> Result<Vec<Flag>, StoreError>;

    fn save_player(&self, player: &PlayerRecord) -> Result<(), StoreError>;
    fn load_player(&self, actor: ActorId) -> Result<Option<PlayerRecord>, StoreError>;
    fn load_all_players(&self) -> Result<Vec<PlayerRecord>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    factions: AHashMap<FactionId, Faction>,
    flags: AHashMap<FlagId, Flag>,
    players: AHashMap<ActorId, PlayerRecord>,
    writes: usize,
}

/// Store kept in process memory. Can be switched offline to exercise the
/// retry path.
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            tables: Mutex::new(MemoryTables::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful writes and deletes so far
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".into()))
        }
    }
}

impl Store for MemoryStore {
    fn save_faction(&self, faction: &Faction) -> Result<(), StoreError> {
        self.check()?;
        let mut tables = self.lock();
        tables.factions.insert(faction.id, faction.clone());
        tables.writes += 1;
        Ok(())
    }

    fn delete_faction(&self, id: FactionId) -> Result<(), StoreError> {
        self.check()?;
        let mut tables = self.lock();
        tables.factions.remove(&id);
        tables.writes += 1;
        Ok(())
    }

    fn load_all_factions(&self) -> Result<Vec<Faction>, StoreError> {
        self.check()?;
        let mut all: Vec<Faction> = self.lock().factions.values().cloned().collect();
        all.sort_by_key(|f| f.id);
        Ok(all)
    }

    fn save_flag(&self, flag: &Flag) -> Result<(), StoreError> {
        self.check()?;
        let mut tables = self.lock();
        tables.flags.insert(flag.id, flag.clone());
        tables.writes += 1;
        Ok(())
    }

    fn delete_flag(&self, id: FlagId) -> Result<(), StoreError> {
        self.check()?;
        let mut tables = self.lock();
        tables.flags.remove(&id);
        tables.writes += 1;
        Ok(())
    }

    fn load_all_flags(&self) -> Result<Vec<Flag>, StoreError> {
        self.check()?;
        let mut all: Vec<Flag> = self.lock().flags.values().cloned().collect();
        all.sort_by_key(|f| f.id);
        Ok(all)
    }

    fn save_player(&self, player: &PlayerRecord) -> Result<(), StoreError> {
        self.check()?;
        let mut tables = self.lock();
        tables.players.insert(player.actor, player.clone());
        tables.writes += 1;
        Ok(())
    }

    fn load_player(&self, actor: ActorId) -> Result<Option<PlayerRecord>, StoreError> {
        self.check()?;
        Ok(self.lock().players.get(&actor).cloned())
    }

    fn load_all_players(&self) -> Result<Vec<PlayerRecord>, StoreError> {
        self.check()?;
        let mut all: Vec<PlayerRecord> = self.lock().players.values().cloned().collect();
        all.sort_by_key(|p| p.actor);
        Ok(all)
    }
}
