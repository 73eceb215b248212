//! Entries and distinguished names.
//!
//! This is a reduced directory entry: a dn, a uuid, and a bag of attribute
//! values. It carries exactly the surface the replication core exercises,
//! including the historical attribute and the conflict marker.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::modify::{Modify, ModifyList};
use crate::prelude::{OperationError, ATTR_ENTRY_UUID, ATTR_SYNC_CONFLICT, ATTR_SYNC_HIST};
use crate::schema::{AttributeDescription, SchemaTransaction};

fn escape_dn_value(v: &str, out: &mut String) {
    for c in v.chars() {
        if matches!(c, ',' | '+' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Split on `sep`, honouring backslash escapes. The separators themselves
/// are never part of a value unescaped, so this is enough for the dn forms
/// we produce and consume.
fn split_escaped(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut esc = false;
    for c in s.chars() {
        if esc {
            cur.push(c);
            esc = false;
        } else if c == '\\' {
            esc = true;
        } else if c == sep {
            parts.push(std::mem::take(&mut cur));
        } else {
            cur.push(c);
        }
    }
    parts.push(cur);
    parts
}

/// A relative distinguished name. Usually a single attribute-value pair, but
/// conflict entries are renamed under a multi-valued rdn that prepends the
/// entry uuid to the original rdn.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rdn {
    avas: Vec<(String, String)>,
}

impl Rdn {
    pub fn new(attr: &str, value: &str) -> Self {
        Rdn {
            avas: vec![(attr.to_lowercase(), value.to_string())],
        }
    }

    /// Prepend an ava, as used to build conflict rdns.
    pub fn with_prefix(&self, attr: &str, value: &str) -> Self {
        let mut avas = Vec::with_capacity(self.avas.len() + 1);
        avas.push((attr.to_lowercase(), value.to_string()));
        avas.extend(self.avas.iter().cloned());
        Rdn { avas }
    }

    pub fn avas(&self) -> &[(String, String)] {
        &self.avas
    }

    /// The value of the named attribute within this rdn, if present.
    pub fn value_of(&self, attr: &str) -> Option<&str> {
        let attr = attr.to_lowercase();
        self.avas
            .iter()
            .find(|(a, _)| *a == attr)
            .map(|(_, v)| v.as_str())
    }

    fn parse(s: &str) -> Result<Self, OperationError> {
        let mut avas = Vec::new();
        for part in split_escaped(s, '+') {
            let (attr, value) = part
                .split_once('=')
                .ok_or(OperationError::InvalidEntryState)?;
            avas.push((attr.trim().to_lowercase(), value.trim().to_string()));
        }
        if avas.is_empty() {
            return Err(OperationError::InvalidEntryState);
        }
        Ok(Rdn { avas })
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (attr, value)) in self.avas.iter().enumerate() {
            if i != 0 {
                f.write_str("+")?;
            }
            let mut v = String::new();
            escape_dn_value(value, &mut v);
            write!(f, "{}={}", attr, v)?;
        }
        Ok(())
    }
}

/// A distinguished name, leftmost (leaf) rdn first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    pub fn child(rdn: Rdn, parent: &Dn) -> Self {
        let mut rdns = Vec::with_capacity(parent.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(parent.rdns.iter().cloned());
        Dn { rdns }
    }

    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.len() <= 1 {
            None
        } else {
            Some(Dn {
                rdns: self.rdns[1..].to_vec(),
            })
        }
    }

    pub fn depth(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_descendant_of(&self, other: &Dn) -> bool {
        self.rdns.len() > other.rdns.len() && self.rdns[self.rdns.len() - other.rdns.len()..] == other.rdns
    }

}

impl FromStr for Dn {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rdns = Vec::new();
        for part in split_escaped(s, ',') {
            rdns.push(Rdn::parse(&part)?);
        }
        Ok(Dn { rdns })
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i != 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", rdn)?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    dn: Dn,
    attrs: BTreeMap<AttributeDescription, Vec<String>>,
}

impl Entry {
    pub fn new(dn: Dn) -> Self {
        Entry {
            dn,
            attrs: BTreeMap::new(),
        }
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = dn;
    }

    pub fn uuid(&self) -> Result<Uuid, OperationError> {
        self.attrs
            .get(&AttributeDescription::new(ATTR_ENTRY_UUID))
            .and_then(|vs| vs.first())
            .ok_or(OperationError::MissingEntryUuid)
            .and_then(|v| Uuid::parse_str(v).map_err(|_| OperationError::InvalidEntryState))
    }

    pub fn set_uuid(&mut self, uuid: Uuid) {
        self.attrs.insert(
            AttributeDescription::new(ATTR_ENTRY_UUID),
            vec![uuid.to_string()],
        );
    }

    pub fn add_ava(&mut self, attr: &str, value: &str) {
        self.attrs
            .entry(AttributeDescription::parse(attr))
            .or_default()
            .push(value.to_string());
    }

    pub fn get_ava(&self, ad: &AttributeDescription) -> Option<&[String]> {
        self.attrs.get(ad).map(|vs| vs.as_slice())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&AttributeDescription, &[String])> {
        self.attrs.iter().map(|(ad, vs)| (ad, vs.as_slice()))
    }

    /// Keep only the attributes the predicate accepts.
    pub fn retain_attrs<F>(&mut self, mut f: F)
    where
        F: FnMut(&AttributeDescription) -> bool,
    {
        self.attrs.retain(|ad, _| f(ad));
    }

    pub fn attribute_pres(&self, ad: &AttributeDescription) -> bool {
        self.attrs.contains_key(ad)
    }

    /// Whether the attribute currently holds `value` under its matching rule.
    pub fn contains_value(
        &self,
        schema: &dyn SchemaTransaction,
        ad: &AttributeDescription,
        value: &str,
    ) -> Result<bool, OperationError> {
        let Some(vs) = self.attrs.get(ad) else {
            return Ok(false);
        };
        let norm = schema.normalize(ad, value)?;
        for v in vs {
            if schema.normalize(ad, v)? == norm {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The persisted historical attribute values, in stored order.
    pub fn sync_hist(&self) -> Vec<String> {
        self.attrs
            .get(&AttributeDescription::new(ATTR_SYNC_HIST))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_sync_hist(&mut self, values: Vec<String>) {
        let ad = AttributeDescription::new(ATTR_SYNC_HIST);
        if values.is_empty() {
            self.attrs.remove(&ad);
        } else {
            self.attrs.insert(ad, values);
        }
    }

    pub fn conflict_marker(&self) -> Option<&str> {
        self.attrs
            .get(&AttributeDescription::new(ATTR_SYNC_CONFLICT))
            .and_then(|vs| vs.first())
            .map(|v| v.as_str())
    }

    pub fn set_conflict_marker(&mut self, intended_dn: Option<&Dn>) {
        let ad = AttributeDescription::new(ATTR_SYNC_CONFLICT);
        match intended_dn {
            Some(dn) => {
                self.attrs.insert(ad, vec![dn.to_string()]);
            }
            None => {
                self.attrs.remove(&ad);
            }
        }
    }

    /// Apply a (resolved) modification list to the entry content. Values are
    /// deduplicated and matched under the schema matching rule.
    pub fn apply_modlist(
        &mut self,
        schema: &dyn SchemaTransaction,
        ml: &ModifyList,
    ) -> Result<(), OperationError> {
        for m in ml.iter() {
            match m {
                Modify::Add(ad, values) => {
                    for v in values {
                        if !self.contains_value(schema, ad, v)? {
                            self.attrs.entry(ad.clone()).or_default().push(v.clone());
                        }
                    }
                }
                Modify::Delete(ad, values) if values.is_empty() => {
                    self.attrs.remove(ad);
                }
                Modify::Delete(ad, values) => {
                    let mut norms = Vec::with_capacity(values.len());
                    for v in values {
                        norms.push(schema.normalize(ad, v)?);
                    }
                    if let Some(vs) = self.attrs.get_mut(ad) {
                        let mut kept = Vec::with_capacity(vs.len());
                        for v in vs.drain(..) {
                            if !norms.contains(&schema.normalize(ad, &v)?) {
                                kept.push(v);
                            }
                        }
                        *vs = kept;
                        if vs.is_empty() {
                            self.attrs.remove(ad);
                        }
                    }
                }
                Modify::Replace(ad, values) => {
                    if values.is_empty() {
                        self.attrs.remove(ad);
                    } else {
                        self.attrs.insert(ad.clone(), values.clone());
                    }
                }
                Modify::Increment(ad, delta) => {
                    let delta: i64 = delta
                        .parse()
                        .map_err(|_| OperationError::InvalidEntryState)?;
                    let cur: i64 = match self.attrs.get(ad).and_then(|vs| vs.first()) {
                        Some(v) => v.parse().map_err(|_| OperationError::InvalidEntryState)?,
                        None => 0,
                    };
                    self.attrs
                        .insert(ad.clone(), vec![(cur + delta).to_string()]);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::prelude::*;

    #[test]
    fn test_dn_parse_display() {
        let dn = Dn::from_str("uid=user.1,ou=People,dc=example,dc=com").expect("parse");
        assert_eq!(dn.to_string(), "uid=user.1,ou=People,dc=example,dc=com");
        assert_eq!(dn.rdn().and_then(|r| r.value_of("uid")), Some("user.1"));
        assert_eq!(
            dn.parent().map(|p| p.to_string()),
            Some("ou=People,dc=example,dc=com".to_string())
        );

        let base = Dn::from_str("dc=example,dc=com").expect("parse");
        assert!(dn.is_descendant_of(&base));
        assert!(!base.is_descendant_of(&dn));
    }

    #[test]
    fn test_dn_multivalued_rdn() {
        let base = Dn::from_str("ou=people,dc=example,dc=com").expect("parse");
        let rdn = Rdn::new("cn", "bob").with_prefix("entryuuid", "11111111-1111-1111-1111-111111111111");
        let dn = Dn::child(rdn, &base);
        assert_eq!(
            dn.to_string(),
            "entryuuid=11111111-1111-1111-1111-111111111111+cn=bob,ou=people,dc=example,dc=com"
        );
        let back = Dn::from_str(&dn.to_string()).expect("parse");
        assert_eq!(back, dn);
        assert_eq!(
            back.rdn().and_then(|r| r.value_of("entryuuid")),
            Some("11111111-1111-1111-1111-111111111111")
        );
    }

    #[test]
    fn test_dn_escaped_values() {
        let rdn = Rdn::new("cn", "doe, john+jr");
        let base = Dn::from_str("dc=example").expect("parse");
        let dn = Dn::child(rdn.clone(), &base);
        assert_eq!(dn.to_string(), "cn=doe\\, john\\+jr,dc=example");
        let back = Dn::from_str(&dn.to_string()).expect("parse");
        assert_eq!(back.rdn().and_then(|r| r.value_of("cn")), Some("doe, john+jr"));
    }

    #[test]
    fn test_entry_apply_modlist() {
        let schema = Schema::core();
        let dn = Dn::from_str("uid=user.1,dc=example,dc=com").expect("parse");
        let mut e = Entry::new(dn);
        e.add_ava("description", "init value");

        let ml = ModifyList::new_list(vec![
            m_add("description", &["second value", "Init Value"]),
            m_delete("description", &["init value"]),
        ]);
        e.apply_modlist(&schema, &ml).expect("apply");

        let ad = AttributeDescription::new("description");
        assert_eq!(e.get_ava(&ad), Some(&["second value".to_string()][..]));

        e.apply_modlist(&schema, &ModifyList::new_list(vec![m_purge("description")]))
            .expect("apply");
        assert!(!e.attribute_pres(&ad));
    }

    #[test]
    fn test_entry_uuid_and_markers() {
        let dn = Dn::from_str("uid=user.1,dc=example,dc=com").expect("parse");
        let mut e = Entry::new(dn.clone());
        assert_eq!(e.uuid(), Err(OperationError::MissingEntryUuid));

        let u = uuid!("33333333-3333-3333-3333-333333333333");
        e.set_uuid(u);
        assert_eq!(e.uuid(), Ok(u));

        assert!(e.conflict_marker().is_none());
        e.set_conflict_marker(Some(&dn));
        assert_eq!(e.conflict_marker(), Some("uid=user.1,dc=example,dc=com"));
        e.set_conflict_marker(None);
        assert!(e.conflict_marker().is_none());
    }
}
