//! A replication domain ties one replicated suffix to its csn source, its
//! fractional configuration and its conflict counters, and dispatches
//! incoming update messages to the resolvers. Domains live in an explicit
//! registry owned by the caller.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::be::EntryStore;
use crate::entry::{Dn, Entry};
use crate::prelude::OperationError;
use crate::repl::csn::{Csn, CsnGenerator};
use crate::repl::fractional::FractionalConfig;
use crate::repl::naming::{NamingConflictResolver, NamingResolution};
use crate::repl::proto::ReplUpdateMessage;
use crate::repl::replay::ReplayOutcome;
use crate::schema::SchemaTransaction;

/// Conflict resolution counters, exposed for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorCounters {
    pub resolved_modify_conflicts: u64,
    pub resolved_naming_conflicts: u64,
    pub unresolved_naming_conflicts: u64,
}

/// The outcome of processing one replicated update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub resolution: NamingResolution,
    /// Present for modify messages: what survived historical resolution.
    pub replay: Option<ReplayOutcome>,
}

#[derive(Debug, Clone)]
pub struct ReplicationDomain {
    root: Dn,
    replica_id: u16,
    generator: CsnGenerator,
    fractional: FractionalConfig,
    counters: MonitorCounters,
}

impl ReplicationDomain {
    pub fn new(root: Dn, replica_id: u16) -> Self {
        ReplicationDomain {
            root,
            replica_id,
            generator: CsnGenerator::new(replica_id),
            fractional: FractionalConfig::all(),
            counters: MonitorCounters::default(),
        }
    }

    pub fn with_fractional(mut self, fractional: FractionalConfig) -> Self {
        self.fractional = fractional;
        self
    }

    pub fn root(&self) -> &Dn {
        &self.root
    }

    pub fn replica_id(&self) -> u16 {
        self.replica_id
    }

    pub fn fractional(&self) -> &FractionalConfig {
        &self.fractional
    }

    pub fn counters(&self) -> &MonitorCounters {
        &self.counters
    }

    /// Stamp a locally originated change.
    pub fn new_csn(&mut self, now: Duration) -> Csn {
        self.generator.new_csn(now)
    }

    /// Replay one incoming update against the store.
    #[instrument(level = "debug", skip_all, fields(root = %self.root, csn = %msg.csn()))]
    pub fn process(
        &mut self,
        schema: &dyn SchemaTransaction,
        store: &mut dyn EntryStore,
        msg: &ReplUpdateMessage,
    ) -> Result<ProcessResult, OperationError> {
        let resolver = NamingConflictResolver::new(schema, self.root.clone());
        match msg {
            ReplUpdateMessage::Add {
                csn,
                uuid,
                dn,
                parent_uuid,
                attrs,
            } => {
                let mut entry = Entry::new(dn.clone());
                for (attr, values) in attrs {
                    for v in values {
                        entry.add_ava(attr, v);
                    }
                }
                entry.set_uuid(*uuid);
                self.fractional.filter_entry(&mut entry);
                let resolution =
                    resolver.replay_add(store, &mut self.counters, csn, entry, *parent_uuid)?;
                Ok(ProcessResult {
                    resolution,
                    replay: None,
                })
            }
            ReplUpdateMessage::Modify {
                csn,
                uuid,
                dn,
                mods,
            } => {
                let mods = self.fractional.filter_modlist(mods);
                if mods.is_empty() {
                    return Ok(ProcessResult {
                        resolution: NamingResolution::Suppressed,
                        replay: None,
                    });
                }
                let (resolution, replay) = resolver.replay_modify(
                    store,
                    &mut self.counters,
                    csn,
                    *uuid,
                    dn,
                    &mods,
                )?;
                Ok(ProcessResult { resolution, replay })
            }
            ReplUpdateMessage::Delete { uuid, dn, .. } => {
                let resolution =
                    resolver.replay_delete(store, &mut self.counters, *uuid, dn)?;
                Ok(ProcessResult {
                    resolution,
                    replay: None,
                })
            }
            ReplUpdateMessage::ModifyDn {
                csn,
                uuid,
                new_rdn,
                new_superior,
                ..
            } => {
                let resolution = resolver.replay_moddn(
                    store,
                    &mut self.counters,
                    csn,
                    *uuid,
                    new_rdn,
                    new_superior.as_ref(),
                )?;
                Ok(ProcessResult {
                    resolution,
                    replay: None,
                })
            }
        }
    }
}

/// The set of configured replication domains, looked up by suffix.
#[derive(Debug, Clone, Default)]
pub struct DomainRegistry {
    domains: BTreeMap<Dn, ReplicationDomain>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        DomainRegistry::default()
    }

    pub fn register(&mut self, domain: ReplicationDomain) -> Result<(), OperationError> {
        if self.domains.contains_key(domain.root()) {
            return Err(OperationError::InvalidEntryState);
        }
        info!(root = %domain.root(), replica_id = domain.replica_id(), "registered replication domain");
        self.domains.insert(domain.root().clone(), domain);
        Ok(())
    }

    pub fn unregister(&mut self, root: &Dn) -> Option<ReplicationDomain> {
        self.domains.remove(root)
    }

    /// The domain whose root is the longest suffix of `dn`.
    pub fn find_domain(&self, dn: &Dn) -> Option<&ReplicationDomain> {
        self.domains
            .values()
            .filter(|d| dn == d.root() || dn.is_descendant_of(d.root()))
            .max_by_key(|d| d.root().depth())
    }

    pub fn find_domain_mut(&mut self, dn: &Dn) -> Option<&mut ReplicationDomain> {
        self.domains
            .values_mut()
            .filter(|d| dn == d.root() || dn.is_descendant_of(d.root()))
            .max_by_key(|d| d.root().depth())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplicationDomain> {
        self.domains.values()
    }
}
