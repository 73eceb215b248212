//! Modification lists. These are the unit the replay resolver works on: a
//! received change is a list of modifications stamped with a single csn, and
//! resolution rewrites the list in place of applying it blindly.

use std::slice;

use serde::{Deserialize, Serialize};

use crate::schema::AttributeDescription;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Modify {
    /// Add the listed values to the attribute.
    Add(AttributeDescription, Vec<String>),
    /// Delete the listed values, or the whole attribute when empty.
    Delete(AttributeDescription, Vec<String>),
    /// Replace the attribute content with the listed values. An empty list
    /// is equivalent to deleting the attribute.
    Replace(AttributeDescription, Vec<String>),
    /// Atomically increment an integer attribute. Not tracked historically.
    Increment(AttributeDescription, String),
}

pub fn m_add(attr: &str, values: &[&str]) -> Modify {
    Modify::Add(
        AttributeDescription::parse(attr),
        values.iter().map(|v| v.to_string()).collect(),
    )
}

pub fn m_delete(attr: &str, values: &[&str]) -> Modify {
    Modify::Delete(
        AttributeDescription::parse(attr),
        values.iter().map(|v| v.to_string()).collect(),
    )
}

/// Delete the whole attribute regardless of content.
pub fn m_purge(attr: &str) -> Modify {
    Modify::Delete(AttributeDescription::parse(attr), Vec::new())
}

pub fn m_replace(attr: &str, values: &[&str]) -> Modify {
    Modify::Replace(
        AttributeDescription::parse(attr),
        values.iter().map(|v| v.to_string()).collect(),
    )
}

impl Modify {
    pub fn attribute(&self) -> &AttributeDescription {
        match self {
            Modify::Add(ad, _)
            | Modify::Delete(ad, _)
            | Modify::Replace(ad, _)
            | Modify::Increment(ad, _) => ad,
        }
    }

    pub fn values(&self) -> &[String] {
        match self {
            Modify::Add(_, vs) | Modify::Delete(_, vs) | Modify::Replace(_, vs) => vs,
            Modify::Increment(_, v) => slice::from_ref(v),
        }
    }

}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ModifyList {
    mods: Vec<Modify>,
}

impl ModifyList {
    pub fn new() -> Self {
        ModifyList { mods: Vec::new() }
    }

    pub fn new_list(mods: Vec<Modify>) -> Self {
        ModifyList { mods }
    }

    pub fn push_mod(&mut self, modify: Modify) {
        self.mods.push(modify)
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, Modify> {
        self.mods.iter()
    }
}

impl IntoIterator for ModifyList {
    type Item = Modify;
    type IntoIter = std::vec::IntoIter<Modify>;

    fn into_iter(self) -> Self::IntoIter {
        self.mods.into_iter()
    }
}

impl FromIterator<Modify> for ModifyList {
    fn from_iter<T: IntoIterator<Item = Modify>>(iter: T) -> Self {
        ModifyList {
            mods: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modify_helpers() {
        let m = m_add("Description", &["first value"]);
        assert_eq!(m.attribute(), &AttributeDescription::new("description"));
        assert_eq!(m.values(), &["first value".to_string()]);

        let purge = m_purge("description");
        assert_eq!(purge, Modify::Delete(AttributeDescription::new("description"), vec![]));
    }

    #[test]
    fn test_modify_list_collect() {
        let ml: ModifyList = vec![m_add("cn", &["a"]), m_delete("cn", &["b"])]
            .into_iter()
            .collect();
        assert_eq!(ml.len(), 2);
        assert!(!ml.is_empty());
    }
}
