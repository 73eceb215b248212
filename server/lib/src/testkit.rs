//! Shared test setup.

use crate::be::MemoryBackend;
use crate::entry::Entry;
use crate::prelude::*;
use crate::schema::Schema;

pub fn test_init() {
    // Ignore the error when a previous test in the same binary already
    // installed the subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub const TEST_ROOT: &str = "dc=example,dc=com";

pub fn test_schema() -> Schema {
    Schema::core()
}

pub fn test_entry(dn: &str, uuid: Uuid) -> Entry {
    let mut e = Entry::new(dn.parse().expect("test dn"));
    e.set_uuid(uuid);
    e.add_ava("objectclass", "person");
    e
}

pub fn test_backend() -> MemoryBackend {
    MemoryBackend::new()
}
