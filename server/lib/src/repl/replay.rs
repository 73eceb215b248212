//! Replay of replicated modify operations against an entry.
//!
//! The resolver decodes the entry's historical attribute, pushes each
//! modification through the per attribute rules, applies whatever survives
//! to the entry content, and re-encodes the history. Modifications are
//! applied one at a time so that later modifications in the same operation
//! see the effect of earlier ones.

use std::collections::BTreeMap;

use crate::entry::Entry;
use crate::modify::{Modify, ModifyList};
use crate::prelude::{OperationError, SchemaError, ATTR_SYNC_HIST};
use crate::repl::csn::Csn;
use crate::repl::hist_attr::{ModOutcome, ReplayCtx};
use crate::repl::hist_entry::EntryHistorical;
use crate::schema::{AttributeDescription, NormValue, SchemaTransaction};

/// The result of replaying one modify operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// The modifications that were applied, after rewriting.
    pub applied: ModifyList,
    /// Modifications dropped without effect.
    pub suppressed: Vec<Modify>,
    /// Whether any modification lost to existing history.
    pub conflict: bool,
}

impl ReplayOutcome {
    /// True when the operation changed nothing on this replica.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

pub struct ModifyReplayResolver<'a> {
    schema: &'a dyn SchemaTransaction,
}

impl<'a> ModifyReplayResolver<'a> {
    pub fn new(schema: &'a dyn SchemaTransaction) -> Self {
        ModifyReplayResolver { schema }
    }

    fn live_values(
        &self,
        entry: &Entry,
        ad: &AttributeDescription,
    ) -> Result<BTreeMap<NormValue, String>, OperationError> {
        let mut live = BTreeMap::new();
        if let Some(values) = entry.get_ava(ad) {
            for v in values {
                live.insert(self.schema.normalize(ad, v)?, v.clone());
            }
        }
        Ok(live)
    }

    /// Resolve and apply `ml`, stamped with `csn`, against `entry`. The
    /// entry's content and historical attribute are both updated.
    #[instrument(level = "trace", skip_all, fields(%csn))]
    pub fn replay(
        &self,
        entry: &mut Entry,
        csn: &Csn,
        ml: &ModifyList,
    ) -> Result<ReplayOutcome, OperationError> {
        let mut hist = EntryHistorical::from_entry(self.schema, entry)?;
        let mut ctxs: BTreeMap<AttributeDescription, ReplayCtx> = BTreeMap::new();
        let mut applied = ModifyList::new();
        let mut suppressed = Vec::new();
        let mut conflict = false;

        for modify in ml.iter() {
            let ad = modify.attribute().clone();
            // The historical attribute itself is never modified directly.
            if ad.name() == ATTR_SYNC_HIST {
                suppressed.push(modify.clone());
                continue;
            }
            let sa = self
                .schema
                .attribute(&ad)
                .cloned()
                .ok_or_else(|| SchemaError::UnknownAttributeType(ad.to_string()))?;
            let live = self.live_values(entry, &ad)?;
            let ctx = ctxs.entry(ad.clone()).or_default();
            let h = hist.attr_mut(&ad, sa.single_value);
            match h.replay(&sa, ctx, csn, modify.clone(), &live) {
                ModOutcome::Keep(resolved) => {
                    entry.apply_modlist(
                        self.schema,
                        &ModifyList::new_list(vec![resolved.clone()]),
                    )?;
                    applied.push_mod(resolved);
                }
                ModOutcome::Conflict => {
                    trace!(attr = %ad, %csn, "modification lost to history");
                    conflict = true;
                    suppressed.push(modify.clone());
                }
                ModOutcome::Drop => {
                    suppressed.push(modify.clone());
                }
            }
        }

        entry.set_sync_hist(hist.encode_and_purge());
        Ok(ReplayOutcome {
            applied,
            suppressed,
            conflict,
        })
    }
}
