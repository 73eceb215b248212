//! The persisted form of entry history: the `ds-sync-hist` attribute.
//!
//! Each value is one token, `attr:CSN:op[:value]`, where op is one of
//! `add`, `del`, `repl` or `attrDel`. The pseudo attribute `dn` records the
//! entry's creation (`add`) and last rename (`moddn`). Encoding purges
//! clocks made redundant by a newer whole-attribute delete, so the
//! attribute stays bounded by live state rather than growing with every
//! change.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::entry::Entry;
use crate::prelude::{OperationError, ATTR_DN_PSEUDO, CSN_TEXT_LEN};
use crate::repl::csn::Csn;
use crate::repl::hist_attr::{AttrHistory, AttrHistoryMulti, AttrHistorySingle, ValueHistory};
use crate::schema::{AttributeDescription, SchemaTransaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistOp {
    Add,
    Del,
    Repl,
    AttrDel,
    ModDn,
}

impl fmt::Display for HistOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HistOp::Add => "add",
            HistOp::Del => "del",
            HistOp::Repl => "repl",
            HistOp::AttrDel => "attrDel",
            HistOp::ModDn => "moddn",
        })
    }
}

impl FromStr for HistOp {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(HistOp::Add),
            "del" => Ok(HistOp::Del),
            "repl" => Ok(HistOp::Repl),
            "attrDel" => Ok(HistOp::AttrDel),
            "moddn" => Ok(HistOp::ModDn),
            _ => Err(()),
        }
    }
}

/// One decoded `ds-sync-hist` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistToken {
    pub attr: String,
    pub csn: Csn,
    pub op: HistOp,
    pub value: Option<String>,
}

impl HistToken {
    pub fn encode(&self) -> String {
        match &self.value {
            Some(v) => format!("{}:{}:{}:{}", self.attr, self.csn, self.op, v),
            None => format!("{}:{}:{}", self.attr, self.csn, self.op),
        }
    }

    /// Parse a token. The attribute name never contains a colon and the csn
    /// is fixed width, so the value (which may itself contain colons) is
    /// whatever remains after the op.
    pub fn decode(s: &str) -> Result<Self, OperationError> {
        let bad = || OperationError::HistoricalDecode(s.to_string());
        let (attr, rest) = s.split_once(':').ok_or_else(bad)?;
        if attr.is_empty() || rest.len() < CSN_TEXT_LEN + 1 {
            return Err(bad());
        }
        let (csn_text, rest) = rest.split_at(CSN_TEXT_LEN);
        let csn = Csn::from_str(csn_text).map_err(|_| bad())?;
        let rest = rest.strip_prefix(':').ok_or_else(bad)?;
        let (op_text, value) = match rest.split_once(':') {
            Some((op, v)) => (op, Some(v.to_string())),
            None => (rest, None),
        };
        let op = HistOp::from_str(op_text).map_err(|_| bad())?;
        Ok(HistToken {
            attr: attr.to_string(),
            csn,
            op,
            value,
        })
    }
}

/// Clocks for the entry's own lifecycle, kept under the `dn` pseudo
/// attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnHistory {
    pub add: Option<Csn>,
    pub moddn: Option<Csn>,
}

/// The full historical state of one entry, decoded from and re-encoded to
/// its `ds-sync-hist` attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryHistorical {
    pub attrs: BTreeMap<AttributeDescription, AttrHistory>,
    pub dn: DnHistory,
}

impl EntryHistorical {
    pub fn from_entry(
        schema: &dyn SchemaTransaction,
        entry: &Entry,
    ) -> Result<Self, OperationError> {
        let mut hist = EntryHistorical::default();
        for raw in entry.sync_hist() {
            let token = HistToken::decode(&raw)?;
            if token.attr == ATTR_DN_PSEUDO {
                match token.op {
                    HistOp::Add => hist.dn.add = Some(token.csn),
                    HistOp::ModDn => hist.dn.moddn = Some(token.csn),
                    _ => return Err(OperationError::HistoricalDecode(raw)),
                }
                continue;
            }
            let ad = AttributeDescription::parse(&token.attr);
            let single = schema.is_single_valued(&ad)?;
            let h = hist
                .attrs
                .entry(ad.clone())
                .or_insert_with(|| AttrHistory::empty(single));
            match h {
                AttrHistory::Single(s) => Self::decode_single(s, &raw, token)?,
                AttrHistory::Multi(m) => Self::decode_multi(schema, &ad, m, &raw, token)?,
            }
        }
        Ok(hist)
    }

    fn decode_single(
        h: &mut AttrHistorySingle,
        raw: &str,
        token: HistToken,
    ) -> Result<(), OperationError> {
        match token.op {
            HistOp::Add => {
                h.update = Some(token.csn);
                h.value = token.value;
                h.added = true;
            }
            HistOp::Repl => {
                h.update = Some(token.csn);
                h.value = token.value;
                h.added = false;
            }
            HistOp::AttrDel | HistOp::Del => h.delete = Some(token.csn),
            HistOp::ModDn => return Err(OperationError::HistoricalDecode(raw.to_string())),
        }
        Ok(())
    }

    fn decode_multi(
        schema: &dyn SchemaTransaction,
        ad: &AttributeDescription,
        h: &mut AttrHistoryMulti,
        raw: &str,
        token: HistToken,
    ) -> Result<(), OperationError> {
        let value_of = |t: &HistToken| {
            t.value
                .clone()
                .ok_or_else(|| OperationError::HistoricalDecode(raw.to_string()))
        };
        match token.op {
            HistOp::Add => {
                let v = value_of(&token)?;
                let norm = schema.normalize(ad, &v)?;
                h.values.insert(
                    norm,
                    ValueHistory {
                        update: Some(token.csn),
                        delete: None,
                        raw: v,
                    },
                );
            }
            HistOp::Del => {
                let v = value_of(&token)?;
                let norm = schema.normalize(ad, &v)?;
                h.values.insert(
                    norm,
                    ValueHistory {
                        update: None,
                        delete: Some(token.csn),
                        raw: v,
                    },
                );
            }
            HistOp::Repl => {
                // A replace is a whole-attribute delete plus an add at the
                // same clock.
                let v = value_of(&token)?;
                let norm = schema.normalize(ad, &v)?;
                h.attr_delete = Some(token.csn.clone());
                h.values.insert(
                    norm,
                    ValueHistory {
                        update: Some(token.csn),
                        delete: None,
                        raw: v,
                    },
                );
            }
            HistOp::AttrDel => h.attr_delete = Some(token.csn),
            HistOp::ModDn => return Err(OperationError::HistoricalDecode(raw.to_string())),
        }
        Ok(())
    }

    /// Initial history for a freshly replicated entry: every attribute
    /// value is an add at the entry's creation csn.
    pub fn for_new_entry(
        schema: &dyn SchemaTransaction,
        entry: &Entry,
        csn: &Csn,
    ) -> Result<Self, OperationError> {
        let mut hist = EntryHistorical {
            dn: DnHistory {
                add: Some(csn.clone()),
                moddn: None,
            },
            ..Default::default()
        };
        for (ad, values) in entry.attrs() {
            if ad.name() == crate::prelude::ATTR_SYNC_HIST {
                continue;
            }
            let single = schema.is_single_valued(ad)?;
            match hist.attr_mut(ad, single) {
                AttrHistory::Single(h) => {
                    if let Some(v) = values.first() {
                        h.update = Some(csn.clone());
                        h.value = Some(v.clone());
                        h.added = true;
                    }
                }
                AttrHistory::Multi(h) => {
                    for v in values {
                        let norm = schema.normalize(ad, v)?;
                        h.record_update(norm, csn, v);
                    }
                }
            }
        }
        Ok(hist)
    }

    pub fn attr_mut(&mut self, ad: &AttributeDescription, single: bool) -> &mut AttrHistory {
        self.attrs
            .entry(ad.clone())
            .or_insert_with(|| AttrHistory::empty(single))
    }

    /// Encode back to `ds-sync-hist` values, purging redundant clocks
    /// first. The output order is deterministic but carries no meaning.
    pub fn encode_and_purge(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(csn) = &self.dn.add {
            out.push(
                HistToken {
                    attr: ATTR_DN_PSEUDO.to_string(),
                    csn: csn.clone(),
                    op: HistOp::Add,
                    value: None,
                }
                .encode(),
            );
        }
        if let Some(csn) = &self.dn.moddn {
            out.push(
                HistToken {
                    attr: ATTR_DN_PSEUDO.to_string(),
                    csn: csn.clone(),
                    op: HistOp::ModDn,
                    value: None,
                }
                .encode(),
            );
        }
        for (ad, h) in self.attrs.iter_mut() {
            match h {
                AttrHistory::Single(s) => Self::encode_single(ad, s, &mut out),
                AttrHistory::Multi(m) => Self::encode_multi(ad, m, &mut out),
            }
        }
        out
    }

    fn encode_single(ad: &AttributeDescription, h: &AttrHistorySingle, out: &mut Vec<String>) {
        if let (Some(csn), Some(value)) = (&h.update, &h.value) {
            out.push(
                HistToken {
                    attr: ad.to_string(),
                    csn: csn.clone(),
                    op: if h.added { HistOp::Add } else { HistOp::Repl },
                    value: Some(value.clone()),
                }
                .encode(),
            );
        }
        if let Some(csn) = &h.delete {
            out.push(
                HistToken {
                    attr: ad.to_string(),
                    csn: csn.clone(),
                    op: HistOp::AttrDel,
                    value: None,
                }
                .encode(),
            );
        }
    }

    fn encode_multi(ad: &AttributeDescription, h: &mut AttrHistoryMulti, out: &mut Vec<String>) {
        h.purge();
        // The value whose add clock equals the whole-attribute delete clock
        // is the replace itself; the first such value carries the `repl` op
        // and stands in for a separate attrDel token.
        let mut repl_emitted = false;
        for vh in h.values.values() {
            if let Some(csn) = &vh.update {
                let op = if !repl_emitted && Some(csn) == h.attr_delete.as_ref() {
                    repl_emitted = true;
                    HistOp::Repl
                } else {
                    HistOp::Add
                };
                out.push(
                    HistToken {
                        attr: ad.to_string(),
                        csn: csn.clone(),
                        op,
                        value: Some(vh.raw.clone()),
                    }
                    .encode(),
                );
            }
            if let Some(csn) = &vh.delete {
                out.push(
                    HistToken {
                        attr: ad.to_string(),
                        csn: csn.clone(),
                        op: HistOp::Del,
                        value: Some(vh.raw.clone()),
                    }
                    .encode(),
                );
            }
        }
        if !repl_emitted {
            if let Some(csn) = &h.attr_delete {
                out.push(
                    HistToken {
                        attr: ad.to_string(),
                        csn: csn.clone(),
                        op: HistOp::AttrDel,
                        value: None,
                    }
                    .encode(),
                );
            }
        }
    }
}
