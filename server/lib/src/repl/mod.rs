//! The replication conflict resolution core.
//!
//! Change ordering is defined by [`csn::Csn`], a logical clock totally
//! ordering every update across all replicas. Each entry carries a
//! historical attribute summarising its recent changes; [`hist_attr`] and
//! [`hist_entry`] maintain it, [`replay`] resolves incoming modifications
//! against it, and [`naming`] resolves dn level conflicts between whole
//! entry operations. [`domain`] ties the pieces together per replicated
//! suffix.

pub mod csn;
pub mod domain;
pub mod fractional;
pub mod hist_attr;
pub mod hist_entry;
pub mod naming;
pub mod proto;
pub mod replay;
