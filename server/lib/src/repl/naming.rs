//! Naming conflict resolution for whole entry operations.
//!
//! Replicated add, delete, modify and rename operations name a dn, but the
//! identity of an entry is its uuid. When replicas diverge, the dn in the
//! operation may be stale, reused, or point under a deleted parent. The
//! resolver locates targets by uuid, renames colliding entries under a
//! generated conflict dn that embeds their uuid, and restores them to their
//! intended dn once the collision goes away.

use uuid::Uuid;

use crate::be::EntryStore;
use crate::entry::{Dn, Entry, Rdn};
use crate::modify::ModifyList;
use crate::prelude::{OperationError, ATTR_ENTRY_UUID};
use crate::repl::csn::Csn;
use crate::repl::domain::MonitorCounters;
use crate::repl::hist_entry::EntryHistorical;
use crate::repl::replay::{ModifyReplayResolver, ReplayOutcome};
use crate::schema::SchemaTransaction;

/// How an entry level operation was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingResolution {
    /// Applied at the dn the operation named.
    Applied,
    /// Applied after locating the target by uuid at a different dn.
    Redirected(Dn),
    /// The entry now lives under a generated conflict dn.
    ConflictRenamed(Dn),
    /// The operation was older than existing state and dropped.
    Suppressed,
}

pub struct NamingConflictResolver<'a> {
    schema: &'a dyn SchemaTransaction,
    root: Dn,
}

impl<'a> NamingConflictResolver<'a> {
    pub fn new(schema: &'a dyn SchemaTransaction, root: Dn) -> Self {
        NamingConflictResolver { schema, root }
    }

    /// The conflict dn for an entry: its uuid prepended to the intended
    /// rdn, placed under the intended parent when that parent is live and
    /// under the replication root otherwise.
    fn conflict_dn(&self, store: &dyn EntryStore, uuid: Uuid, intended: &Dn) -> Dn {
        let rdn = match intended.rdn() {
            Some(r) => r.with_prefix(ATTR_ENTRY_UUID, &uuid.to_string()),
            None => Rdn::new(ATTR_ENTRY_UUID, &uuid.to_string()),
        };
        let parent = match intended.parent() {
            Some(p) if p == self.root || store.get_by_dn(&p).is_some() => p,
            _ => self.root.clone(),
        };
        Dn::child(rdn, &parent)
    }

    fn parent_is_live(&self, store: &dyn EntryStore, dn: &Dn) -> bool {
        match dn.parent() {
            None => true,
            Some(p) => p == self.root || store.get_by_dn(&p).is_some(),
        }
    }

    /// If a conflict entry is waiting for `freed`, move it back and clear
    /// its marker.
    fn restore_conflict(
        &self,
        store: &mut dyn EntryStore,
        counters: &mut MonitorCounters,
        freed: &Dn,
    ) -> Result<(), OperationError> {
        let Some(uuid) = store.conflict_for(freed) else {
            return Ok(());
        };
        store.rename(uuid, freed.clone())?;
        if let Some(entry) = store.get_by_uuid_mut(uuid) {
            entry.set_conflict_marker(None);
        }
        info!(%uuid, dn = %freed, "restored conflict entry to its intended dn");
        counters.resolved_naming_conflicts += 1;
        counters.unresolved_naming_conflicts = counters.unresolved_naming_conflicts.saturating_sub(1);
        Ok(())
    }

    /// Replay a replicated add. The entry carries its uuid; its history is
    /// initialised at `csn`. `parent_uuid` identifies the intended parent
    /// so the add can follow it if it was renamed on another replica.
    pub fn replay_add(
        &self,
        store: &mut dyn EntryStore,
        counters: &mut MonitorCounters,
        csn: &Csn,
        mut entry: Entry,
        parent_uuid: Option<Uuid>,
    ) -> Result<NamingResolution, OperationError> {
        let uuid = entry.uuid()?;
        if store.get_by_uuid(uuid).is_some() {
            // The entry already exists here: a replayed or concurrent add
            // of the same entry.
            counters.resolved_naming_conflicts += 1;
            return Ok(NamingResolution::Suppressed);
        }

        let mut hist = EntryHistorical::for_new_entry(self.schema, &entry, csn)?;
        entry.set_sync_hist(hist.encode_and_purge());

        // The parent dn in the message may be stale: if the parent entry is
        // known by uuid and has moved, the add follows it.
        let mut redirected = false;
        if !self.parent_is_live(store, entry.dn()) {
            if let Some(parent) = parent_uuid.and_then(|p| store.get_by_uuid(p)) {
                if let Some(rdn) = entry.dn().rdn().cloned() {
                    let retargeted = Dn::child(rdn, parent.dn());
                    info!(%uuid, dn = %retargeted, "add followed renamed parent");
                    entry.set_dn(retargeted);
                    counters.resolved_naming_conflicts += 1;
                    redirected = true;
                }
            }
        }

        let intended = entry.dn().clone();
        let dn_holder = match store.get_by_dn(&intended) {
            Some(e) => Some(e.uuid()?),
            None => None,
        };
        let parent_live = self.parent_is_live(store, &intended);

        if dn_holder.is_none() && parent_live {
            store.insert(entry)?;
            return Ok(if redirected {
                NamingResolution::Redirected(intended)
            } else {
                NamingResolution::Applied
            });
        }

        // Either the dn was reused by a different entry, or the parent was
        // deleted on another replica. Keep the entry, under a dn of its own.
        let cdn = self.conflict_dn(store, uuid, &intended);
        warn!(%uuid, intended = %intended, conflict = %cdn, "naming conflict on add");
        entry.set_conflict_marker(Some(&intended));
        entry.set_dn(cdn.clone());
        store.insert(entry)?;
        counters.unresolved_naming_conflicts += 1;
        Ok(NamingResolution::ConflictRenamed(cdn))
    }

    /// Replay a replicated delete, locating the target by uuid.
    pub fn replay_delete(
        &self,
        store: &mut dyn EntryStore,
        counters: &mut MonitorCounters,
        uuid: Uuid,
        dn: &Dn,
    ) -> Result<NamingResolution, OperationError> {
        let Some(target) = store.get_by_uuid(uuid) else {
            // Already deleted here.
            counters.resolved_naming_conflicts += 1;
            return Ok(NamingResolution::Suppressed);
        };
        let actual = target.dn().clone();
        store.remove_by_uuid(uuid);

        // Children added concurrently on another replica survive the parent
        // delete, each under a conflict dn of its own. Only direct children
        // are re-homed: a deeper raced-in subtree keeps its stale dns until
        // updates for those entries are themselves replayed.
        for child in store.children_of(&actual) {
            let Some(child_entry) = store.get_by_uuid(child) else {
                continue;
            };
            let child_dn = child_entry.dn().clone();
            let cdn = self.conflict_dn(store, child, &child_dn);
            warn!(uuid = %child, intended = %child_dn, conflict = %cdn, "orphaned by parent delete");
            store.rename(child, cdn)?;
            if let Some(e) = store.get_by_uuid_mut(child) {
                e.set_conflict_marker(Some(&child_dn));
            }
            counters.unresolved_naming_conflicts += 1;
        }

        self.restore_conflict(store, counters, &actual)?;

        if actual == *dn {
            Ok(NamingResolution::Applied)
        } else {
            counters.resolved_naming_conflicts += 1;
            Ok(NamingResolution::Redirected(actual))
        }
    }

    /// Replay a replicated modify, locating the target by uuid and pushing
    /// the modifications through historical resolution.
    pub fn replay_modify(
        &self,
        store: &mut dyn EntryStore,
        counters: &mut MonitorCounters,
        csn: &Csn,
        uuid: Uuid,
        dn: &Dn,
        ml: &ModifyList,
    ) -> Result<(NamingResolution, Option<ReplayOutcome>), OperationError> {
        let Some(entry) = store.get_by_uuid_mut(uuid) else {
            // The entry was deleted on this replica; the modify loses.
            counters.resolved_naming_conflicts += 1;
            return Ok((NamingResolution::Suppressed, None));
        };
        let actual = entry.dn().clone();

        let out = ModifyReplayResolver::new(self.schema).replay(entry, csn, ml)?;
        if out.conflict {
            counters.resolved_modify_conflicts += 1;
        }

        if actual == *dn {
            Ok((NamingResolution::Applied, Some(out)))
        } else {
            counters.resolved_naming_conflicts += 1;
            Ok((NamingResolution::Redirected(actual), Some(out)))
        }
    }

    /// Replay a replicated rename.
    pub fn replay_moddn(
        &self,
        store: &mut dyn EntryStore,
        counters: &mut MonitorCounters,
        csn: &Csn,
        uuid: Uuid,
        new_rdn: &Rdn,
        new_superior: Option<&Dn>,
    ) -> Result<NamingResolution, OperationError> {
        let Some(entry) = store.get_by_uuid(uuid) else {
            counters.resolved_naming_conflicts += 1;
            return Ok(NamingResolution::Suppressed);
        };
        let old_dn = entry.dn().clone();

        let mut hist = EntryHistorical::from_entry(self.schema, entry)?;
        // A rename older than what the entry has already seen loses.
        let newest = hist.dn.moddn.as_ref().or(hist.dn.add.as_ref());
        if newest.is_some_and(|n| n >= csn) {
            counters.resolved_naming_conflicts += 1;
            return Ok(NamingResolution::Suppressed);
        }

        let parent = match new_superior {
            Some(p) => p.clone(),
            None => old_dn.parent().unwrap_or_else(|| self.root.clone()),
        };
        let intended = Dn::child(new_rdn.clone(), &parent);

        hist.dn.moddn = Some(csn.clone());
        let encoded = hist.encode_and_purge();

        let target_holder = match store.get_by_dn(&intended) {
            Some(e) => Some(e.uuid()?),
            None => None,
        };
        let collision = target_holder.is_some_and(|h| h != uuid);

        let (dest, resolution) = if collision {
            let cdn = self.conflict_dn(store, uuid, &intended);
            warn!(%uuid, intended = %intended, conflict = %cdn, "naming conflict on rename");
            counters.unresolved_naming_conflicts += 1;
            (cdn.clone(), NamingResolution::ConflictRenamed(cdn))
        } else {
            (intended.clone(), NamingResolution::Applied)
        };

        store.rename(uuid, dest.clone())?;
        if let Some(e) = store.get_by_uuid_mut(uuid) {
            e.set_sync_hist(encoded);
            if collision {
                e.set_conflict_marker(Some(&intended));
            } else {
                e.set_conflict_marker(None);
            }
        }
        if dest != old_dn {
            self.restore_conflict(store, counters, &old_dn)?;
        }
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::be::MemoryBackend;
    use crate::prelude::*;

    const ROOT: &str = "dc=example,dc=com";
    const UUID_A: Uuid = uuid!("11111111-1111-1111-1111-111111111111");
    const UUID_B: Uuid = uuid!("22222222-2222-2222-2222-222222222222");

    fn entry_at(dn: &str, uuid: Uuid) -> Entry {
        let mut e = Entry::new(dn.parse().expect("dn"));
        e.set_uuid(uuid);
        e.add_ava("objectclass", "person");
        e
    }

    fn setup() -> (Schema, Dn, MemoryBackend, MonitorCounters) {
        (
            Schema::core(),
            ROOT.parse().expect("dn"),
            MemoryBackend::new(),
            MonitorCounters::default(),
        )
    }

    #[test]
    fn test_add_dn_reuse_conflict() {
        let (schema, root, mut be, mut counters) = setup();
        let resolver = NamingConflictResolver::new(&schema, root);

        let r = resolver
            .replay_add(
                &mut be,
                &mut counters,
                &Csn::at(1),
                entry_at("cn=bob,dc=example,dc=com", UUID_A),
                None,
            )
            .expect("add");
        assert_eq!(r, NamingResolution::Applied);

        // A different entry claiming the same dn lands under a conflict dn.
        let r = resolver
            .replay_add(
                &mut be,
                &mut counters,
                &Csn::at(2),
                entry_at("cn=bob,dc=example,dc=com", UUID_B),
                None,
            )
            .expect("add");
        let expect: Dn = format!("entryuuid={}+cn=bob,dc=example,dc=com", UUID_B)
            .parse()
            .expect("dn");
        assert_eq!(r, NamingResolution::ConflictRenamed(expect.clone()));
        assert_eq!(counters.unresolved_naming_conflicts, 1);

        let conflict = be.get_by_dn(&expect).expect("conflict entry");
        assert_eq!(conflict.conflict_marker(), Some("cn=bob,dc=example,dc=com"));
    }

    #[test]
    fn test_delete_redirected_by_uuid() {
        let (schema, root, mut be, mut counters) = setup();
        let resolver = NamingConflictResolver::new(&schema, root);

        resolver
            .replay_add(
                &mut be,
                &mut counters,
                &Csn::at(1),
                entry_at("cn=bob,dc=example,dc=com", UUID_A),
                None,
            )
            .expect("add");
        be.rename(UUID_A, "cn=robert,dc=example,dc=com".parse().expect("dn"))
            .expect("rename");

        // The delete still names the old dn; identity wins.
        let stale: Dn = "cn=bob,dc=example,dc=com".parse().expect("dn");
        let r = resolver
            .replay_delete(&mut be, &mut counters, UUID_A, &stale)
            .expect("delete");
        assert_eq!(
            r,
            NamingResolution::Redirected("cn=robert,dc=example,dc=com".parse().expect("dn"))
        );
        assert!(be.is_empty());
        assert_eq!(counters.resolved_naming_conflicts, 1);
    }

    #[test]
    fn test_delete_restores_waiting_conflict() {
        let (schema, root, mut be, mut counters) = setup();
        let resolver = NamingConflictResolver::new(&schema, root);

        resolver
            .replay_add(
                &mut be,
                &mut counters,
                &Csn::at(1),
                entry_at("cn=bob,dc=example,dc=com", UUID_A),
                None,
            )
            .expect("add");
        resolver
            .replay_add(
                &mut be,
                &mut counters,
                &Csn::at(2),
                entry_at("cn=bob,dc=example,dc=com", UUID_B),
                None,
            )
            .expect("add");
        assert_eq!(counters.unresolved_naming_conflicts, 1);

        let dn: Dn = "cn=bob,dc=example,dc=com".parse().expect("dn");
        resolver
            .replay_delete(&mut be, &mut counters, UUID_A, &dn)
            .expect("delete");

        // The conflict entry moved into the freed dn and lost its marker.
        let restored = be.get_by_dn(&dn).expect("restored entry");
        assert_eq!(restored.uuid(), Ok(UUID_B));
        assert!(restored.conflict_marker().is_none());
        assert_eq!(counters.unresolved_naming_conflicts, 0);
    }

    #[test]
    fn test_parent_delete_child_add_race() {
        let (schema, root, mut be, mut counters) = setup();
        let resolver = NamingConflictResolver::new(&schema, root);

        resolver
            .replay_add(
                &mut be,
                &mut counters,
                &Csn::at(1),
                entry_at("ou=people,dc=example,dc=com", UUID_A),
                None,
            )
            .expect("add");
        resolver
            .replay_add(
                &mut be,
                &mut counters,
                &Csn::at(2),
                entry_at("cn=bob,ou=people,dc=example,dc=com", UUID_B),
                None,
            )
            .expect("add");

        let parent_dn: Dn = "ou=people,dc=example,dc=com".parse().expect("dn");
        resolver
            .replay_delete(&mut be, &mut counters, UUID_A, &parent_dn)
            .expect("delete");

        // The child survives, re-homed under the root as a conflict entry.
        let child = be.get_by_uuid(UUID_B).expect("child survives");
        assert_eq!(
            child.dn().to_string(),
            format!("entryuuid={}+cn=bob,dc=example,dc=com", UUID_B)
        );
        assert_eq!(
            child.conflict_marker(),
            Some("cn=bob,ou=people,dc=example,dc=com")
        );
        assert_eq!(counters.unresolved_naming_conflicts, 1);
    }

    #[test]
    fn test_add_under_missing_parent() {
        let (schema, root, mut be, mut counters) = setup();
        let resolver = NamingConflictResolver::new(&schema, root);

        let r = resolver
            .replay_add(
                &mut be,
                &mut counters,
                &Csn::at(1),
                entry_at("cn=bob,ou=ghost,dc=example,dc=com", UUID_A),
                None,
            )
            .expect("add");
        match r {
            NamingResolution::ConflictRenamed(dn) => {
                assert_eq!(
                    dn.to_string(),
                    format!("entryuuid={}+cn=bob,dc=example,dc=com", UUID_A)
                );
            }
            other => panic!("expected conflict rename, got {:?}", other),
        }
    }

    #[test]
    fn test_add_follows_renamed_parent() {
        let (schema, root, mut be, mut counters) = setup();
        let resolver = NamingConflictResolver::new(&schema, root);

        resolver
            .replay_add(
                &mut be,
                &mut counters,
                &Csn::at(1),
                entry_at("ou=people,dc=example,dc=com", UUID_A),
                None,
            )
            .expect("add");
        be.rename(UUID_A, "ou=staff,dc=example,dc=com".parse().expect("dn"))
            .expect("rename");

        // The add names the parent's old dn but carries its uuid, so the
        // entry lands under the parent's current dn.
        let r = resolver
            .replay_add(
                &mut be,
                &mut counters,
                &Csn::at(2),
                entry_at("cn=bob,ou=people,dc=example,dc=com", UUID_B),
                Some(UUID_A),
            )
            .expect("add");
        assert_eq!(
            r,
            NamingResolution::Redirected(
                "cn=bob,ou=staff,dc=example,dc=com".parse().expect("dn")
            )
        );
        let child = be.get_by_uuid(UUID_B).expect("child");
        assert_eq!(child.dn().to_string(), "cn=bob,ou=staff,dc=example,dc=com");
        assert!(child.conflict_marker().is_none());
        assert_eq!(counters.resolved_naming_conflicts, 1);
    }

    #[test]
    fn test_moddn_older_rename_suppressed() {
        let (schema, root, mut be, mut counters) = setup();
        let resolver = NamingConflictResolver::new(&schema, root);

        resolver
            .replay_add(
                &mut be,
                &mut counters,
                &Csn::at(1),
                entry_at("cn=bob,dc=example,dc=com", UUID_A),
                None,
            )
            .expect("add");
        let r = resolver
            .replay_moddn(
                &mut be,
                &mut counters,
                &Csn::at(3),
                UUID_A,
                &Rdn::new("cn", "robert"),
                None,
            )
            .expect("moddn");
        assert_eq!(r, NamingResolution::Applied);

        // A rename that happened before the one we already applied loses.
        let r = resolver
            .replay_moddn(
                &mut be,
                &mut counters,
                &Csn::at(2),
                UUID_A,
                &Rdn::new("cn", "bobby"),
                None,
            )
            .expect("moddn");
        assert_eq!(r, NamingResolution::Suppressed);
        assert_eq!(
            be.get_by_uuid(UUID_A).map(|e| e.dn().to_string()),
            Some("cn=robert,dc=example,dc=com".to_string())
        );
    }

    #[test]
    fn test_moddn_collision_becomes_conflict() {
        let (schema, root, mut be, mut counters) = setup();
        let resolver = NamingConflictResolver::new(&schema, root);

        resolver
            .replay_add(
                &mut be,
                &mut counters,
                &Csn::at(1),
                entry_at("cn=bob,dc=example,dc=com", UUID_A),
                None,
            )
            .expect("add");
        resolver
            .replay_add(
                &mut be,
                &mut counters,
                &Csn::at(1),
                entry_at("cn=robert,dc=example,dc=com", UUID_B),
                None,
            )
            .expect("add");

        let r = resolver
            .replay_moddn(
                &mut be,
                &mut counters,
                &Csn::at(2),
                UUID_A,
                &Rdn::new("cn", "robert"),
                None,
            )
            .expect("moddn");
        match r {
            NamingResolution::ConflictRenamed(dn) => {
                assert_eq!(
                    dn.to_string(),
                    format!("entryuuid={}+cn=robert,dc=example,dc=com", UUID_A)
                );
            }
            other => panic!("expected conflict rename, got {:?}", other),
        }
        let moved = be.get_by_uuid(UUID_A).expect("entry");
        assert_eq!(
            moved.conflict_marker(),
            Some("cn=robert,dc=example,dc=com")
        );
    }
}
