//! The dirsyncd server library. This implements the conflict resolution core
//! of the multi-master directory replication system: logical clocks, the
//! per-attribute historical metadata, modify replay, and naming conflict
//! resolution.

#![deny(warnings)]
#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::manual_let_else)]

#[macro_use]
extern crate tracing;
#[macro_use]
extern crate lazy_static;

pub mod be;
pub mod entry;
pub mod modify;
pub mod repl;
pub mod schema;
#[cfg(test)]
pub mod testkit;

/// A prelude of imports that should be imported by all other dirsyncd
/// modules to help make imports cleaner.
pub mod prelude {
    pub use dirsyncd_proto::constants::*;
    pub use dirsyncd_proto::internal::{ConsistencyError, OperationError, SchemaError};
    pub use std::time::Duration;
    pub use uuid::{uuid, Uuid};

    pub use crate::be::{EntryStore, MemoryBackend};
    pub use crate::entry::{Dn, Entry, Rdn};
    pub use crate::modify::{m_add, m_delete, m_purge, m_replace, Modify, ModifyList};
    pub use crate::repl::csn::{Csn, CsnGenerator};
    pub use crate::schema::{
        AttributeDescription, MatchingRule, NormValue, Schema, SchemaTransaction,
    };
}
