//! Per attribute historical state and the modify resolution rules.
//!
//! Every replicated modification arrives stamped with a csn. The historical
//! state remembers, per attribute and per value, when it was last added and
//! when it was last deleted. Resolving a modification means comparing its
//! csn against those clocks: the newer clock always wins, and a losing
//! modification is rewritten or dropped so that replicas applying the same
//! set of changes in any order converge on the same entry.
//!
//! Within a single replayed operation the rules differ slightly: a clock
//! written earlier in the same operation does not beat a later modification
//! with an equal csn, so `delete: v` followed by `add: v` in one operation
//! nets out to the add. Across operations an equal csn means the change was
//! already seen and is suppressed.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::modify::Modify;
use crate::repl::csn::Csn;
use crate::schema::{NormValue, SchemaAttribute};

/// The fate of one modification after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModOutcome {
    /// Apply the modification, possibly rewritten to exclude values that
    /// lost to history.
    Keep(Modify),
    /// The modification lost to existing history and is dropped.
    Conflict,
    /// The modification has nothing left to do. Not a conflict.
    Drop,
}

/// Per invocation bookkeeping for the equal-csn tie break. Clocks recorded
/// during the current operation only block later modifications when they are
/// strictly newer.
#[derive(Debug, Default)]
pub struct ReplayCtx {
    touched_values: BTreeSet<NormValue>,
    touched_attr: bool,
}

impl ReplayCtx {
    fn value_blocks(&self, existing: Option<&Csn>, csn: &Csn, value: &NormValue) -> bool {
        match existing {
            None => false,
            Some(e) if self.touched_values.contains(value) => e > csn,
            Some(e) => e >= csn,
        }
    }

    fn attr_blocks(&self, existing: Option<&Csn>, csn: &Csn) -> bool {
        match existing {
            None => false,
            Some(e) if self.touched_attr => e > csn,
            Some(e) => e >= csn,
        }
    }
}

/// The clocks tracked for one value of a multi-valued attribute. `raw`
/// preserves the original spelling for re-encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueHistory {
    pub update: Option<Csn>,
    pub delete: Option<Csn>,
    pub raw: String,
}

/// History of a single-valued attribute: the clock of the value currently
/// held (if any), and the clock of the most recent attribute delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrHistorySingle {
    pub update: Option<Csn>,
    pub delete: Option<Csn>,
    pub value: Option<String>,
    /// Whether the current value arrived through an add (true) or a
    /// replace. Only affects how the history is encoded.
    pub added: bool,
}

impl AttrHistorySingle {
    fn is_empty_history(&self) -> bool {
        self.update.is_none() && self.delete.is_none()
    }

    fn newest(&self) -> Option<&Csn> {
        match (&self.update, &self.delete) {
            (Some(u), Some(d)) => Some(u.max(d)),
            (Some(u), None) => Some(u),
            (None, Some(d)) => Some(d),
            (None, None) => None,
        }
    }

    fn accept_value(&mut self, csn: &Csn, value: &str, added: bool, ctx: &mut ReplayCtx) {
        self.update = Some(csn.clone());
        self.value = Some(value.to_string());
        self.added = added;
        ctx.touched_attr = true;
    }

    fn accept_delete(&mut self, csn: &Csn, ctx: &mut ReplayCtx) {
        self.delete = Some(csn.clone());
        self.update = None;
        self.value = None;
        ctx.touched_attr = true;
    }

    pub fn replay(
        &mut self,
        sa: &SchemaAttribute,
        ctx: &mut ReplayCtx,
        csn: &Csn,
        modify: Modify,
        live: &BTreeMap<NormValue, String>,
    ) -> ModOutcome {
        match modify {
            Modify::Increment(_, _) => ModOutcome::Keep(modify),
            Modify::Add(ad, values) => {
                if ctx.attr_blocks(self.newest(), csn) {
                    return ModOutcome::Conflict;
                }
                match values.first() {
                    Some(v) => {
                        self.accept_value(csn, v, true, ctx);
                        ModOutcome::Keep(Modify::Replace(ad, values))
                    }
                    None => ModOutcome::Drop,
                }
            }
            Modify::Replace(ad, values) => {
                if ctx.attr_blocks(self.newest(), csn) {
                    return ModOutcome::Conflict;
                }
                match values.first() {
                    Some(v) => {
                        self.accept_value(csn, v, false, ctx);
                        ModOutcome::Keep(Modify::Replace(ad, values))
                    }
                    None => {
                        // Replace with no values is an attribute delete.
                        self.accept_delete(csn, ctx);
                        ModOutcome::Keep(Modify::Delete(ad, Vec::new()))
                    }
                }
            }
            Modify::Delete(ad, values) => {
                // The value currently held: the history's when one is
                // tracked, otherwise whatever the entry content carries.
                // Content without history predates replication and an
                // absent clock never outranks an incoming delete.
                let current = if self.is_empty_history() {
                    live.values().next().cloned()
                } else {
                    self.value.clone()
                };
                // A delete naming a value only applies when that value is
                // what the attribute currently holds.
                if let Some(target) = values.first() {
                    let matches = current
                        .as_ref()
                        .is_some_and(|cur| sa.normalize(cur) == sa.normalize(target));
                    if !matches {
                        if self.is_empty_history() {
                            // Nothing tracked yet; the clock is still
                            // recorded so an older add arriving later loses.
                            self.accept_delete(csn, ctx);
                        }
                        return ModOutcome::Drop;
                    }
                }
                if ctx.attr_blocks(self.newest(), csn) {
                    return ModOutcome::Conflict;
                }
                let applies = current.is_some();
                self.accept_delete(csn, ctx);
                if applies {
                    ModOutcome::Keep(Modify::Delete(ad, Vec::new()))
                } else {
                    ModOutcome::Drop
                }
            }
        }
    }
}

/// History of a multi-valued attribute: per value clocks plus the clock of
/// the most recent whole-attribute delete (which a replace also implies).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrHistoryMulti {
    pub values: BTreeMap<NormValue, ValueHistory>,
    pub attr_delete: Option<Csn>,
}

impl AttrHistoryMulti {
    fn is_empty_history(&self) -> bool {
        self.values.is_empty() && self.attr_delete.is_none()
    }

    pub fn record_update(&mut self, norm: NormValue, csn: &Csn, raw: &str) {
        let vh = self.values.entry(norm).or_insert_with(|| ValueHistory {
            update: None,
            delete: None,
            raw: raw.to_string(),
        });
        vh.update = Some(csn.clone());
        vh.delete = None;
        vh.raw = raw.to_string();
    }

    fn record_delete(&mut self, norm: NormValue, csn: &Csn, raw: &str) {
        let vh = self.values.entry(norm).or_insert_with(|| ValueHistory {
            update: None,
            delete: None,
            raw: raw.to_string(),
        });
        vh.delete = Some(csn.clone());
        vh.update = None;
    }

    /// Live values whose most recent add is newer than `csn`. These survive
    /// an older whole-attribute delete or replace.
    fn surviving_values(&self, csn: &Csn, live: &BTreeMap<NormValue, String>) -> Vec<String> {
        live.iter()
            .filter(|(norm, _)| {
                self.values
                    .get(*norm)
                    .and_then(|vh| vh.update.as_ref())
                    .is_some_and(|u| u > csn)
            })
            .map(|(_, raw)| raw.clone())
            .collect()
    }

    fn replay_add(
        &mut self,
        sa: &SchemaAttribute,
        ctx: &mut ReplayCtx,
        csn: &Csn,
        ad: crate::schema::AttributeDescription,
        values: Vec<String>,
        live: &BTreeMap<NormValue, String>,
    ) -> ModOutcome {
        let mut kept = Vec::with_capacity(values.len());
        for v in values {
            let norm = sa.normalize(&v);
            let vh = self.values.get(&norm);
            let blocked = ctx.value_blocks(vh.and_then(|h| h.update.as_ref()), csn, &norm)
                || ctx.value_blocks(vh.and_then(|h| h.delete.as_ref()), csn, &norm)
                || ctx.attr_blocks(self.attr_delete.as_ref(), csn);
            if blocked {
                continue;
            }
            if live.contains_key(&norm) {
                // Already present: the add is redundant for the entry, but
                // the value's clock still advances.
                self.record_update(norm.clone(), csn, &v);
                ctx.touched_values.insert(norm);
                continue;
            }
            self.record_update(norm.clone(), csn, &v);
            ctx.touched_values.insert(norm);
            kept.push(v);
        }
        if kept.is_empty() {
            ModOutcome::Conflict
        } else {
            ModOutcome::Keep(Modify::Add(ad, kept))
        }
    }

    fn replay_delete_values(
        &mut self,
        sa: &SchemaAttribute,
        ctx: &mut ReplayCtx,
        csn: &Csn,
        ad: crate::schema::AttributeDescription,
        values: Vec<String>,
        live: &BTreeMap<NormValue, String>,
    ) -> ModOutcome {
        let had_history = !self.is_empty_history();
        let mut kept = Vec::with_capacity(values.len());
        for v in values {
            let norm = sa.normalize(&v);
            let vh = self.values.get(&norm);
            if ctx.value_blocks(vh.and_then(|h| h.update.as_ref()), csn, &norm) {
                // A newer add wins over this delete; leave its clock alone.
                continue;
            }
            self.record_delete(norm.clone(), csn, &v);
            ctx.touched_values.insert(norm.clone());
            if live.contains_key(&norm) {
                kept.push(v);
            }
        }
        if !kept.is_empty() {
            ModOutcome::Keep(Modify::Delete(ad, kept))
        } else if had_history {
            ModOutcome::Conflict
        } else {
            ModOutcome::Drop
        }
    }

    fn replay_delete_attr(
        &mut self,
        ctx: &mut ReplayCtx,
        csn: &Csn,
        ad: crate::schema::AttributeDescription,
        live: &BTreeMap<NormValue, String>,
    ) -> ModOutcome {
        if ctx.attr_blocks(self.attr_delete.as_ref(), csn) {
            return ModOutcome::Conflict;
        }
        let had_history = !self.is_empty_history();
        // The clock is recorded even when there is nothing to delete yet:
        // an older add arriving later must still lose to this delete.
        self.attr_delete = Some(csn.clone());
        ctx.touched_attr = true;
        let survivors: BTreeSet<String> = self.surviving_values(csn, live).into_iter().collect();
        if survivors.is_empty() {
            if live.is_empty() && !had_history {
                return ModOutcome::Drop;
            }
            return ModOutcome::Keep(Modify::Delete(ad, Vec::new()));
        }
        // Newer values outlive this delete: rewrite it to remove only the
        // older ones.
        let dead: Vec<String> = live
            .values()
            .filter(|raw| !survivors.contains(*raw))
            .cloned()
            .collect();
        if dead.is_empty() {
            ModOutcome::Conflict
        } else {
            ModOutcome::Keep(Modify::Delete(ad, dead))
        }
    }

    fn replay_replace(
        &mut self,
        sa: &SchemaAttribute,
        ctx: &mut ReplayCtx,
        csn: &Csn,
        ad: crate::schema::AttributeDescription,
        values: Vec<String>,
        live: &BTreeMap<NormValue, String>,
    ) -> ModOutcome {
        if values.is_empty() {
            return self.replay_delete_attr(ctx, csn, ad, live);
        }
        if ctx.attr_blocks(self.attr_delete.as_ref(), csn) {
            return ModOutcome::Conflict;
        }
        self.attr_delete = Some(csn.clone());
        ctx.touched_attr = true;
        let mut kept = Vec::with_capacity(values.len());
        for v in values {
            let norm = sa.normalize(&v);
            let deleted_newer = ctx.value_blocks(
                self.values.get(&norm).and_then(|h| h.delete.as_ref()),
                csn,
                &norm,
            );
            if deleted_newer {
                continue;
            }
            self.record_update(norm.clone(), csn, &v);
            ctx.touched_values.insert(norm);
            kept.push(v);
        }
        // Values added after this replace's csn survive it.
        for raw in self.surviving_values(csn, live) {
            let norm = sa.normalize(&raw);
            if !kept.iter().any(|k| sa.normalize(k) == norm) {
                kept.push(raw);
            }
        }
        if kept.is_empty() {
            ModOutcome::Keep(Modify::Delete(ad, Vec::new()))
        } else {
            ModOutcome::Keep(Modify::Replace(ad, kept))
        }
    }

    pub fn replay(
        &mut self,
        sa: &SchemaAttribute,
        ctx: &mut ReplayCtx,
        csn: &Csn,
        modify: Modify,
        live: &BTreeMap<NormValue, String>,
    ) -> ModOutcome {
        match modify {
            Modify::Increment(_, _) => ModOutcome::Keep(modify),
            Modify::Add(ad, values) => self.replay_add(sa, ctx, csn, ad, values, live),
            Modify::Delete(ad, values) if values.is_empty() => {
                self.replay_delete_attr(ctx, csn, ad, live)
            }
            Modify::Delete(ad, values) => {
                self.replay_delete_values(sa, ctx, csn, ad, values, live)
            }
            Modify::Replace(ad, values) => self.replay_replace(sa, ctx, csn, ad, values, live),
        }
    }

    /// Drop value clocks made redundant by the whole-attribute delete. A
    /// value whose add is the replace itself (equal clock) is retained, as
    /// are values touched after the delete.
    pub fn purge(&mut self) {
        if let Some(t) = self.attr_delete.clone() {
            self.values.retain(|_, vh| {
                let updated_since = vh.update.as_ref().is_some_and(|u| *u >= t);
                let deleted_since = vh.delete.as_ref().is_some_and(|d| *d > t);
                updated_since || deleted_since
            });
        }
    }
}

/// Historical state of one attribute, shaped by its schema cardinality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrHistory {
    Single(AttrHistorySingle),
    Multi(AttrHistoryMulti),
}

impl AttrHistory {
    pub fn empty(single_value: bool) -> Self {
        if single_value {
            AttrHistory::Single(AttrHistorySingle::default())
        } else {
            AttrHistory::Multi(AttrHistoryMulti::default())
        }
    }

    pub fn replay(
        &mut self,
        sa: &SchemaAttribute,
        ctx: &mut ReplayCtx,
        csn: &Csn,
        modify: Modify,
        live: &BTreeMap<NormValue, String>,
    ) -> ModOutcome {
        match self {
            AttrHistory::Single(h) => h.replay(sa, ctx, csn, modify, live),
            AttrHistory::Multi(h) => h.replay(sa, ctx, csn, modify, live),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;
    use crate::schema::SchemaAttribute;

    fn multi_attr() -> SchemaAttribute {
        let schema = Schema::core();
        schema
            .attribute(&AttributeDescription::new("description"))
            .expect("schema attr")
            .clone()
    }

    fn single_attr() -> SchemaAttribute {
        let schema = Schema::core();
        schema
            .attribute(&AttributeDescription::new("displayname"))
            .expect("schema attr")
            .clone()
    }

    fn live(sa: &SchemaAttribute, values: &[&str]) -> BTreeMap<NormValue, String> {
        values
            .iter()
            .map(|v| (sa.normalize(v), v.to_string()))
            .collect()
    }

    #[test]
    fn test_single_newest_wins() {
        let sa = single_attr();
        let mut h = AttrHistorySingle::default();

        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(2),
            m_replace("displayname", &["two"]),
            &live(&sa, &[]),
        );
        assert!(matches!(out, ModOutcome::Keep(_)));

        // An older replace loses.
        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(1),
            m_replace("displayname", &["one"]),
            &live(&sa, &[]),
        );
        assert_eq!(out, ModOutcome::Conflict);
        assert_eq!(h.value.as_deref(), Some("two"));

        // An equal csn replayed later is suppressed too.
        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(2),
            m_replace("displayname", &["two"]),
            &live(&sa, &[]),
        );
        assert_eq!(out, ModOutcome::Conflict);

        // A newer add wins and keeps the delete clock untouched.
        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(3),
            m_purge("displayname"),
            &live(&sa, &[]),
        );
        assert!(matches!(out, ModOutcome::Keep(_)));
        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(4),
            m_add("displayname", &["new value"]),
            &live(&sa, &[]),
        );
        assert!(matches!(out, ModOutcome::Keep(_)));
        assert_eq!(h.update, Some(Csn::at(4)));
        assert_eq!(h.delete, Some(Csn::at(3)));
        assert!(h.added);
    }

    #[test]
    fn test_single_delete_value_must_match() {
        let sa = single_attr();
        let mut h = AttrHistorySingle::default();

        // Delete with no history at all does nothing.
        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(1),
            m_delete("displayname", &["ghost"]),
            &live(&sa, &[]),
        );
        assert_eq!(out, ModOutcome::Drop);

        h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(2),
            m_replace("displayname", &["Kept Name"]),
            &live(&sa, &[]),
        );
        // Deleting a value the attribute does not hold does nothing.
        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(3),
            m_delete("displayname", &["other name"]),
            &live(&sa, &[]),
        );
        assert_eq!(out, ModOutcome::Drop);
        assert_eq!(h.value.as_deref(), Some("Kept Name"));

        // Deleting the held value (matched case-insensitively) works.
        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(3),
            m_delete("displayname", &["kept name"]),
            &live(&sa, &[]),
        );
        assert!(matches!(out, ModOutcome::Keep(_)));
        assert!(h.value.is_none());
    }

    #[test]
    fn test_multi_add_then_older_delete_excised() {
        let sa = multi_attr();
        let mut h = AttrHistoryMulti::default();

        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(2),
            m_add("description", &["v"]),
            &live(&sa, &[]),
        );
        assert_eq!(
            out,
            ModOutcome::Keep(m_add("description", &["v"]))
        );

        // The value now exists in the entry; an older delete of it loses.
        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(1),
            m_delete("description", &["v"]),
            &live(&sa, &["v"]),
        );
        assert_eq!(out, ModOutcome::Conflict);
        assert_eq!(
            h.values.get(&sa.normalize("v")).and_then(|vh| vh.update.clone()),
            Some(Csn::at(2))
        );
    }

    #[test]
    fn test_multi_duplicate_add_bumps_clock() {
        let sa = multi_attr();
        let mut h = AttrHistoryMulti::default();

        h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(1),
            m_add("description", &["v"]),
            &live(&sa, &[]),
        );
        // Re-adding a live value is excised from the mod but its clock moves.
        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(2),
            m_add("description", &["v"]),
            &live(&sa, &["v"]),
        );
        assert_eq!(out, ModOutcome::Conflict);
        assert_eq!(
            h.values.get(&sa.normalize("v")).and_then(|vh| vh.update.clone()),
            Some(Csn::at(2))
        );
    }

    #[test]
    fn test_multi_same_op_delete_then_add() {
        let sa = multi_attr();
        let mut h = AttrHistoryMulti::default();
        let mut ctx = ReplayCtx::default();
        let csn = Csn::at(5);

        h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(1),
            m_add("description", &["v"]),
            &live(&sa, &[]),
        );

        // Within one operation, delete then add of the same value at the
        // same csn nets out to the add.
        let out = h.replay(
            &sa,
            &mut ctx,
            &csn,
            m_delete("description", &["v"]),
            &live(&sa, &["v"]),
        );
        assert_eq!(out, ModOutcome::Keep(m_delete("description", &["v"])));
        let out = h.replay(&sa, &mut ctx, &csn, m_add("description", &["v"]), &live(&sa, &[]));
        assert_eq!(out, ModOutcome::Keep(m_add("description", &["v"])));

        // Replayed in a fresh operation, the same add is suppressed.
        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &csn,
            m_add("description", &["v"]),
            &live(&sa, &["v"]),
        );
        assert_eq!(out, ModOutcome::Conflict);
    }

    #[test]
    fn test_multi_old_attr_delete_spares_newer_values() {
        let sa = multi_attr();
        let mut h = AttrHistoryMulti::default();

        h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(1),
            m_add("description", &["old"]),
            &live(&sa, &[]),
        );
        h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(3),
            m_add("description", &["new"]),
            &live(&sa, &["old"]),
        );

        // A whole-attribute delete between the two only removes "old".
        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(2),
            m_purge("description"),
            &live(&sa, &["old", "new"]),
        );
        assert_eq!(out, ModOutcome::Keep(m_delete("description", &["old"])));
        assert_eq!(h.attr_delete, Some(Csn::at(2)));
    }

    #[test]
    fn test_multi_replace_keeps_newer_adds() {
        let sa = multi_attr();
        let mut h = AttrHistoryMulti::default();

        h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(3),
            m_add("description", &["newer"]),
            &live(&sa, &[]),
        );

        let out = h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(2),
            m_replace("description", &["base"]),
            &live(&sa, &["newer"]),
        );
        assert_eq!(
            out,
            ModOutcome::Keep(m_replace("description", &["base", "newer"]))
        );
        assert_eq!(h.attr_delete, Some(Csn::at(2)));
    }

    #[test]
    fn test_multi_purge_drops_superseded_clocks() {
        let sa = multi_attr();
        let mut h = AttrHistoryMulti::default();

        h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(1),
            m_add("description", &["old"]),
            &live(&sa, &[]),
        );
        h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(2),
            m_purge("description"),
            &live(&sa, &["old"]),
        );
        h.replay(
            &sa,
            &mut ReplayCtx::default(),
            &Csn::at(3),
            m_add("description", &["new"]),
            &live(&sa, &[]),
        );

        h.purge();
        assert!(!h.values.contains_key(&sa.normalize("old")));
        assert!(h.values.contains_key(&sa.normalize("new")));
    }
}
