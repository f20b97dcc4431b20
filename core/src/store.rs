// Listen persistence — durable record of characteristics under subscription
//
// Entries survive process relaunch so restoration can reconcile persisted
// listen intent with actual callback availability (see coordinator).

use crate::types::{CharacteristicId, ServiceId};
use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const LISTEN_PREFIX: &str = "listen_";

/// One persisted (service, characteristic) listen pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenEntry {
    pub service: ServiceId,
    pub characteristic: CharacteristicId,
}

impl From<CharacteristicId> for ListenEntry {
    fn from(characteristic: CharacteristicId) -> Self {
        Self {
            service: characteristic.service(),
            characteristic,
        }
    }
}

/// Storage backend for listen entries
enum StoreBackend {
    Memory(RwLock<BTreeMap<String, ListenEntry>>),
    Persistent(sled::Db),
}

/// Durable, ordered collection of characteristics with an app-intended
/// active listen. Keys are deterministic, so iteration order is stable and
/// re-inserting an entry is an upsert.
pub struct ListenStore {
    backend: StoreBackend,
}

impl ListenStore {
    /// Create a new in-memory store (no durability; tests and hosts that
    /// do not restore listens).
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory(RwLock::new(BTreeMap::new())),
        }
    }

    /// Create a persistent store with a sled backend at the given path.
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        Ok(Self {
            backend: StoreBackend::Persistent(db),
        })
    }

    /// Persistent store at the platform-default data location.
    pub fn persistent_default() -> Result<Self> {
        let base = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("no platform data directory available"))?;
        Self::persistent(base.join("lariat").join("listens"))
    }

    fn key_for(characteristic: &CharacteristicId) -> String {
        format!(
            "{}{}_{}",
            LISTEN_PREFIX,
            characteristic.service(),
            characteristic.uuid()
        )
    }

    /// Record an active listen. Idempotent.
    pub fn insert(&self, characteristic: &CharacteristicId) -> Result<()> {
        let entry = ListenEntry::from(*characteristic);
        let key = Self::key_for(characteristic);
        match &self.backend {
            StoreBackend::Memory(map) => {
                map.write().insert(key, entry);
                Ok(())
            }
            StoreBackend::Persistent(db) => {
                let bytes = bincode::serialize(&entry)?;
                db.insert(key.as_bytes(), bytes)?;
                db.flush()?;
                Ok(())
            }
        }
    }

    /// Drop the record for a characteristic. Removing an absent entry is
    /// not an error.
    pub fn remove(&self, characteristic: &CharacteristicId) -> Result<()> {
        let key = Self::key_for(characteristic);
        match &self.backend {
            StoreBackend::Memory(map) => {
                map.write().remove(&key);
                Ok(())
            }
            StoreBackend::Persistent(db) => {
                db.remove(key.as_bytes())?;
                db.flush()?;
                Ok(())
            }
        }
    }

    /// All persisted entries in stable key order.
    pub fn entries(&self) -> Result<Vec<ListenEntry>> {
        match &self.backend {
            StoreBackend::Memory(map) => Ok(map.read().values().cloned().collect()),
            StoreBackend::Persistent(db) => {
                let mut entries = Vec::new();
                for item in db.scan_prefix(LISTEN_PREFIX.as_bytes()) {
                    let (_, value) = item?;
                    entries.push(bincode::deserialize(&value)?);
                }
                Ok(entries)
            }
        }
    }

    pub fn contains(&self, characteristic: &CharacteristicId) -> Result<bool> {
        let key = Self::key_for(characteristic);
        match &self.backend {
            StoreBackend::Memory(map) => Ok(map.read().contains_key(&key)),
            StoreBackend::Persistent(db) => Ok(db.contains_key(key.as_bytes())?),
        }
    }

    /// Number of persisted listens.
    pub fn count(&self) -> usize {
        match &self.backend {
            StoreBackend::Memory(map) => map.read().len(),
            StoreBackend::Persistent(db) => db.scan_prefix(LISTEN_PREFIX.as_bytes()).count(),
        }
    }
}

impl Default for ListenStore {
    fn default() -> Self {
        Self::memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_characteristic() -> CharacteristicId {
        CharacteristicId::random(ServiceId::random())
    }

    #[test]
    fn test_insert_and_contains() {
        let store = ListenStore::memory();
        let c = make_characteristic();

        assert!(!store.contains(&c).unwrap());
        store.insert(&c).unwrap();
        assert!(store.contains(&c).unwrap());
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let store = ListenStore::memory();
        let c = make_characteristic();

        store.insert(&c).unwrap();
        store.insert(&c).unwrap();
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_remove_absent_entry_is_ok() {
        let store = ListenStore::memory();
        let c = make_characteristic();

        store.remove(&c).unwrap();
        store.insert(&c).unwrap();
        store.remove(&c).unwrap();
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_entries_carry_service_and_characteristic() {
        let store = ListenStore::memory();
        let c = make_characteristic();
        store.insert(&c).unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].characteristic, c);
        assert_eq!(entries[0].service, c.service());
    }

    #[test]
    fn test_entries_order_is_stable() {
        let store = ListenStore::memory();
        let a = make_characteristic();
        let b = make_characteristic();
        let c = make_characteristic();
        for ch in [&a, &b, &c] {
            store.insert(ch).unwrap();
        }

        let first = store.entries().unwrap();
        let second = store.entries().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_persistent_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ListenStore::persistent(dir.path().join("listens")).unwrap();
        let c = make_characteristic();

        store.insert(&c).unwrap();
        assert!(store.contains(&c).unwrap());
        assert_eq!(store.entries().unwrap().len(), 1);

        store.remove(&c).unwrap();
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_persistent_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listens");
        let c = make_characteristic();

        {
            let store = ListenStore::persistent(&path).unwrap();
            store.insert(&c).unwrap();
        }
        // store dropped here — sled has flushed

        {
            let store = ListenStore::persistent(&path).unwrap();
            assert!(store.contains(&c).unwrap());
            assert_eq!(store.entries().unwrap()[0].characteristic, c);
        }
    }
}
