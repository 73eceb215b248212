//! The subset of directory schema that conflict resolution depends on. The
//! resolvers only ever ask two questions of an attribute type: is it single
//! or multi valued, and how do two of its values compare for equality. The
//! full syntax/validation machinery lives with the backend and is out of
//! scope here.

use std::collections::BTreeMap;
use std::fmt;

use dirsyncd_proto::constants::{ATTR_ENTRY_UUID, ATTR_SYNC_CONFLICT, ATTR_SYNC_HIST};
use dirsyncd_proto::internal::SchemaError;
use serde::{Deserialize, Serialize};

/// An attribute identity: the lower-cased type name plus an optional
/// subtype option such as a language tag. Two descriptions with different
/// options are distinct attributes for history purposes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeDescription {
    name: String,
    option: Option<String>,
}

impl AttributeDescription {
    pub fn new(name: &str) -> Self {
        AttributeDescription {
            name: name.to_lowercase(),
            option: None,
        }
    }

    pub fn with_option(name: &str, option: &str) -> Self {
        AttributeDescription {
            name: name.to_lowercase(),
            option: Some(option.to_lowercase()),
        }
    }

    /// Parse `name` or `name;option` as found in historical tokens.
    pub fn parse(s: &str) -> Self {
        match s.split_once(';') {
            Some((name, option)) => Self::with_option(name, option),
            None => Self::new(s),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn option(&self) -> Option<&str> {
        self.option.as_deref()
    }
}

impl fmt::Display for AttributeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.option {
            Some(opt) => write!(f, "{};{}", self.name, opt),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchingRule {
    CaseExact,
    CaseIgnore,
}

/// A value normalised under its attribute's matching rule. This is the
/// equality and map key for all per-value history bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NormValue(String);

impl NormValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct SchemaAttribute {
    pub name: String,
    pub single_value: bool,
    pub matching: MatchingRule,
}

impl SchemaAttribute {
    fn new(name: &str, single_value: bool, matching: MatchingRule) -> Self {
        SchemaAttribute {
            name: name.to_lowercase(),
            single_value,
            matching,
        }
    }

    pub fn normalize(&self, value: &str) -> NormValue {
        match self.matching {
            MatchingRule::CaseExact => NormValue(value.trim().to_string()),
            MatchingRule::CaseIgnore => NormValue(value.trim().to_lowercase()),
        }
    }
}

pub trait SchemaTransaction {
    fn attribute(&self, ad: &AttributeDescription) -> Option<&SchemaAttribute>;

    fn is_single_valued(&self, ad: &AttributeDescription) -> Result<bool, SchemaError> {
        self.attribute(ad)
            .map(|sa| sa.single_value)
            .ok_or_else(|| SchemaError::UnknownAttributeType(ad.to_string()))
    }

    fn normalize(&self, ad: &AttributeDescription, value: &str) -> Result<NormValue, SchemaError> {
        self.attribute(ad)
            .map(|sa| sa.normalize(value))
            .ok_or_else(|| SchemaError::UnknownAttributeType(ad.to_string()))
    }
}

lazy_static! {
    static ref CORE_ATTRIBUTES: Vec<SchemaAttribute> = vec![
        SchemaAttribute::new("objectclass", false, MatchingRule::CaseIgnore),
        SchemaAttribute::new("cn", false, MatchingRule::CaseIgnore),
        SchemaAttribute::new("uid", false, MatchingRule::CaseIgnore),
        SchemaAttribute::new("ou", false, MatchingRule::CaseIgnore),
        SchemaAttribute::new("o", false, MatchingRule::CaseIgnore),
        SchemaAttribute::new("dc", false, MatchingRule::CaseIgnore),
        SchemaAttribute::new("description", false, MatchingRule::CaseIgnore),
        SchemaAttribute::new("seealso", false, MatchingRule::CaseExact),
        SchemaAttribute::new("telephonenumber", false, MatchingRule::CaseIgnore),
        SchemaAttribute::new("displayname", true, MatchingRule::CaseIgnore),
        SchemaAttribute::new("employeenumber", true, MatchingRule::CaseIgnore),
        SchemaAttribute::new("uidnumber", true, MatchingRule::CaseExact),
        SchemaAttribute::new(ATTR_ENTRY_UUID, true, MatchingRule::CaseExact),
        SchemaAttribute::new(ATTR_SYNC_HIST, false, MatchingRule::CaseExact),
        SchemaAttribute::new(ATTR_SYNC_CONFLICT, true, MatchingRule::CaseExact),
    ];
}

/// The attribute type registry. Keyed by lower-cased name; options share
/// their base type's definition.
#[derive(Debug, Clone)]
pub struct Schema {
    attributes: BTreeMap<String, SchemaAttribute>,
}

impl Schema {
    pub fn core() -> Self {
        let attributes = CORE_ATTRIBUTES
            .iter()
            .map(|sa| (sa.name.clone(), sa.clone()))
            .collect();
        Schema { attributes }
    }

    pub fn add_attribute(&mut self, name: &str, single_value: bool, matching: MatchingRule) {
        let sa = SchemaAttribute::new(name, single_value, matching);
        self.attributes.insert(sa.name.clone(), sa);
    }
}

impl SchemaTransaction for Schema {
    fn attribute(&self, ad: &AttributeDescription) -> Option<&SchemaAttribute> {
        self.attributes.get(ad.name())
    }
}
