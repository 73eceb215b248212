//! Entry storage behind a small trait so the resolvers stay independent of
//! how entries are persisted. The in-memory backend keeps a uuid primary
//! index and a dn index, which is the access pattern naming conflict
//! resolution needs: an operation names a dn, but the entry's identity is
//! its uuid.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::entry::Entry;
use crate::prelude::{ConsistencyError, Dn, OperationError};

pub trait EntryStore {
    fn get_by_dn(&self, dn: &Dn) -> Option<&Entry>;
    fn get_by_uuid(&self, uuid: Uuid) -> Option<&Entry>;
    fn get_by_uuid_mut(&mut self, uuid: Uuid) -> Option<&mut Entry>;
    /// Insert a new entry. Fails if its dn or uuid is already in use.
    fn insert(&mut self, entry: Entry) -> Result<(), OperationError>;
    fn remove_by_uuid(&mut self, uuid: Uuid) -> Option<Entry>;
    /// Move an entry to a new dn, keeping its uuid and content.
    fn rename(&mut self, uuid: Uuid, new_dn: Dn) -> Result<(), OperationError>;
    /// Direct children of the given dn, one level deep. Callers that need
    /// a whole subtree must walk it themselves.
    fn children_of(&self, dn: &Dn) -> Vec<Uuid>;
    /// A conflict entry whose intended dn is `dn`, if one is waiting.
    fn conflict_for(&self, dn: &Dn) -> Option<Uuid>;
    /// Cross check the indexes.
    fn verify(&self) -> Vec<ConsistencyError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    entries: BTreeMap<Uuid, Entry>,
    dn_index: BTreeMap<Dn, Uuid>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }
}

impl EntryStore for MemoryBackend {
    fn get_by_dn(&self, dn: &Dn) -> Option<&Entry> {
        self.dn_index.get(dn).and_then(|u| self.entries.get(u))
    }

    fn get_by_uuid(&self, uuid: Uuid) -> Option<&Entry> {
        self.entries.get(&uuid)
    }

    fn get_by_uuid_mut(&mut self, uuid: Uuid) -> Option<&mut Entry> {
        self.entries.get_mut(&uuid)
    }

    fn insert(&mut self, entry: Entry) -> Result<(), OperationError> {
        let uuid = entry.uuid()?;
        if self.entries.contains_key(&uuid) || self.dn_index.contains_key(entry.dn()) {
            return Err(OperationError::InvalidEntryState);
        }
        self.dn_index.insert(entry.dn().clone(), uuid);
        self.entries.insert(uuid, entry);
        Ok(())
    }

    fn remove_by_uuid(&mut self, uuid: Uuid) -> Option<Entry> {
        let entry = self.entries.remove(&uuid)?;
        self.dn_index.remove(entry.dn());
        Some(entry)
    }

    fn rename(&mut self, uuid: Uuid, new_dn: Dn) -> Result<(), OperationError> {
        if let Some(holder) = self.dn_index.get(&new_dn) {
            if *holder != uuid {
                return Err(OperationError::InvalidEntryState);
            }
        }
        let entry = self
            .entries
            .get_mut(&uuid)
            .ok_or(OperationError::NoMatchingEntries)?;
        self.dn_index.remove(entry.dn());
        entry.set_dn(new_dn.clone());
        self.dn_index.insert(new_dn, uuid);
        Ok(())
    }

    fn children_of(&self, dn: &Dn) -> Vec<Uuid> {
        self.dn_index
            .iter()
            .filter(|(d, _)| d.parent().as_ref() == Some(dn))
            .map(|(_, u)| *u)
            .collect()
    }

    fn conflict_for(&self, dn: &Dn) -> Option<Uuid> {
        let wanted = dn.to_string();
        self.entries
            .values()
            .find(|e| e.conflict_marker() == Some(wanted.as_str()))
            .and_then(|e| e.uuid().ok())
    }

    fn verify(&self) -> Vec<ConsistencyError> {
        let mut errs = Vec::new();
        for (uuid, entry) in &self.entries {
            match entry.uuid() {
                Ok(u) if u == *uuid => {}
                _ => errs.push(ConsistencyError::UuidNotUnique(*uuid)),
            }
            match self.dn_index.get(entry.dn()) {
                Some(indexed) if indexed == uuid => {}
                _ => errs.push(ConsistencyError::DnIndexCorrupt(entry.dn().to_string())),
            }
        }
        for (dn, uuid) in &self.dn_index {
            if !self.entries.contains_key(uuid) {
                errs.push(ConsistencyError::DnIndexCorrupt(dn.to_string()));
            }
        }
        errs
    }
}
