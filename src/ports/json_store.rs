//! One-JSON-file-per-record store
//!
//! Layout under the root directory:
//! `factions/<id>.json`, `flags/<id>.json`, `players/<actor>.json`.
//! Writes go to a temporary file first and are renamed into place.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::types::{ActorId, FactionId, FlagId};
use crate::faction::Faction;
use crate::ports::store::{PlayerRecord, Store, StoreError};
use crate::territory::Flag;

const FACTIONS: &str = "factions";
const FLAGS: &str = "flags";
const PLAYERS: &str = "players";

#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    /// Open (creating directories as needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [FACTIONS, FLAGS, PLAYERS] {
            fs::create_dir_all(root.join(dir))?;
        }
        tracing::info!("Opened JSON store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, kind: &str, key: &str) -> PathBuf {
        self.root.join(kind).join(format!("{}.json", key))
    }

    fn write<T: Serialize>(&self, kind: &str, key: &str, value: &T) -> Result<(), StoreError> {
        let target = self.path(kind, key);
        let staging = target.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&staging, &target)?;
        Ok(())
    }

    fn remove(&self, kind: &str, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(kind, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read<T: DeserializeOwned>(&self, kind: &str, key: &str) -> Result<Option<T>, StoreError> {
        match fs::read(self.path(kind, key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_all<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<T>, StoreError> {
        let mut entries: Vec<PathBuf> = fs::read_dir(self.root.join(kind))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        entries.sort();

        let mut values = Vec::with_capacity(entries.len());
        for path in entries {
            let bytes = fs::read(&path)?;
            match serde_json::from_slice(&bytes) {
                Ok(value) => values.push(value),
                Err(e) => {
                    tracing::warn!("Skipping unreadable record {}: {}", path.display(), e);
                }
            }
        }
        Ok(values)
    }
}

impl Store for JsonStore {
    fn save_faction(&self, faction: &Faction) -> Result<(), StoreError> {
        self.write(FACTIONS, &faction.id.0.to_string(), faction)
    }

    fn delete_faction(&self, id: FactionId) -> Result<(), StoreError> {
        self.remove(FACTIONS, &id.0.to_string())
    }

    fn load_all_factions(&self) -> Result<Vec<Faction>, StoreError> {
        let mut all: Vec<Faction> = self.read_all(FACTIONS)?;
        all.sort_by_key(|f| f.id);
        Ok(all)
    }

    fn save_flag(&self, flag: &Flag) -> Result<(), StoreError> {
        self.write(FLAGS, &flag.id.0.to_string(), flag)
    }

    fn delete_flag(&self, id: FlagId) -> Result<(), StoreError> {
        self.remove(FLAGS, &id.0.to_string())
    }

    fn load_all_flags(&self) -> Result<Vec<Flag>, StoreError> {
        let mut all: Vec<Flag> = self.read_all(FLAGS)?;
        all.sort_by_key(|f| f.id);
        Ok(all)
    }

    fn save_player(&self, player: &PlayerRecord) -> Result<(), StoreError> {
        self.write(PLAYERS, &player.actor.to_string(), player)
    }

    fn load_player(&self, actor: ActorId) -> Result<Option<PlayerRecord>, StoreError> {
        self.read(PLAYERS, &actor.to_string())
    }

    fn load_all_players(&self) -> Result<Vec<PlayerRecord>, StoreError> {
        self.read_all(PLAYERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::WorldPos;

    #[test]
    fn test_faction_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        let faction = Faction::new(FactionId(2), "north".into(), "North".into(), ActorId::new(), 9);

        store.save_faction(&faction).unwrap();
        assert_eq!(store.load_all_factions().unwrap(), vec![faction]);

        store.delete_faction(FactionId(2)).unwrap();
        store.delete_faction(FactionId(2)).unwrap();
        assert!(store.load_all_factions().unwrap().is_empty());
    }

    #[test]
    fn test_flags_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let flag = Flag::new(
            FlagId(1),
            "Oakford".into(),
            WorldPos::new("overworld", 10.0, 64.0, -3.0),
            3.0,
            10,
            0,
        );
        JsonStore::open(dir.path()).unwrap().save_flag(&flag).unwrap();

        let reopened = JsonStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load_all_flags().unwrap(), vec![flag]);
    }

    #[test]
    fn test_missing_player_is_none_and_garbage_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        assert_eq!(store.load_player(ActorId::new()).unwrap(), None);

        std::fs::write(dir.path().join(PLAYERS).join("junk.json"), b"not json").unwrap();
        let record = PlayerRecord::new(ActorId::new());
        store.save_player(&record).unwrap();
        assert_eq!(store.load_all_players().unwrap(), vec![record]);
    }
}
