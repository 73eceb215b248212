//! The error taxonomy of the replication core.
//!
//! Conflicts are deliberately absent here: losing to existing history under
//! the CSN total order is an expected outcome, reported as data in the replay
//! result, never as an error.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum SchemaError {
    /// The attribute type is not defined in the schema. Without the
    /// single/multi-valued flag the modification cannot be resolved, so it
    /// is rejected rather than guessed.
    UnknownAttributeType(String),
    InvalidAttributeSyntax(String),
    Corrupted,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyError {
    Unknown,
    /// The historical attribute and the entry content disagree in a way that
    /// replay cannot repair.
    HistoricalDesynchronised(Uuid),
    UuidNotUnique(Uuid),
    DnIndexCorrupt(String),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "lowercase")]
pub enum OperationError {
    /// A persisted `ds-sync-hist` value did not parse as
    /// `attr:CSN:op[:value]`. The entry must be flagged for administrative
    /// attention; dropping the token would erode convergence.
    HistoricalDecode(String),
    SchemaViolation(SchemaError),
    ConsistencyError(Vec<ConsistencyError>),
    InvalidReplChangeId,
    InvalidEntryState,
    MissingEntryUuid,
    NoMatchingEntries,
    BackendEngine,
}

impl PartialEq for OperationError {
    fn eq(&self, other: &Self) -> bool {
        // Variant identity is all the callers (and the tests) ever need.
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for OperationError {}

impl From<SchemaError> for OperationError {
    fn from(e: SchemaError) -> Self {
        OperationError::SchemaViolation(e)
    }
}
