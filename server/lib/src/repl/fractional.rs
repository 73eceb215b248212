//! Fractional replication: per domain filtering of which attributes are
//! replicated. A domain may include only a listed set of attributes or
//! exclude a listed set; a handful of attributes the resolvers depend on
//! are always replicated regardless of configuration.

use std::collections::BTreeSet;

use crate::entry::Entry;
use crate::modify::ModifyList;
use crate::prelude::{ATTR_ENTRY_UUID, ATTR_SYNC_CONFLICT, ATTR_SYNC_HIST};
use crate::schema::AttributeDescription;

// objectclass is structural; the rest carry replication state itself.
const PROTECTED_ATTRS: [&str; 4] = [
    "objectclass",
    ATTR_ENTRY_UUID,
    ATTR_SYNC_HIST,
    ATTR_SYNC_CONFLICT,
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum FractionalMode {
    All,
    Include(BTreeSet<String>),
    Exclude(BTreeSet<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FractionalConfig {
    mode: FractionalMode,
}

impl Default for FractionalConfig {
    fn default() -> Self {
        FractionalConfig {
            mode: FractionalMode::All,
        }
    }
}

impl FractionalConfig {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn include(attrs: &[&str]) -> Self {
        FractionalConfig {
            mode: FractionalMode::Include(attrs.iter().map(|a| a.to_lowercase()).collect()),
        }
    }

    pub fn exclude(attrs: &[&str]) -> Self {
        FractionalConfig {
            mode: FractionalMode::Exclude(attrs.iter().map(|a| a.to_lowercase()).collect()),
        }
    }

    pub fn is_replicated(&self, ad: &AttributeDescription) -> bool {
        if PROTECTED_ATTRS.contains(&ad.name()) {
            return true;
        }
        match &self.mode {
            FractionalMode::All => true,
            FractionalMode::Include(set) => set.contains(ad.name()),
            FractionalMode::Exclude(set) => !set.contains(ad.name()),
        }
    }

    /// Strip modifications of attributes this domain does not replicate.
    pub fn filter_modlist(&self, ml: &ModifyList) -> ModifyList {
        ml.iter()
            .filter(|m| self.is_replicated(m.attribute()))
            .cloned()
            .collect()
    }

    /// Strip non-replicated attributes from an incoming entry.
    pub fn filter_entry(&self, entry: &mut Entry) {
        entry.retain_attrs(|ad| self.is_replicated(ad));
    }
}
