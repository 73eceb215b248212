//! Shared types for the dirsyncd replication components. These definitions
//! are used by both the server library and any tooling that needs to reason
//! about replication outcomes, so they live apart from the server internals.

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod constants;
pub mod internal;
