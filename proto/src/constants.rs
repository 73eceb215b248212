//! Reserved attribute names and replication defaults shared across the
//! dirsyncd components.

/// The operational attribute that persists per-attribute conflict resolution
/// metadata on every replicated entry.
pub const ATTR_SYNC_HIST: &str = "ds-sync-hist";

/// Records the originally intended DN of an entry that had to be renamed to
/// a conflict DN. Removed again when the entry is restored to its intended
/// name.
pub const ATTR_SYNC_CONFLICT: &str = "ds-sync-conflict";

/// The stable, replica-independent identifier attached to every entry at
/// creation. Naming conflict resolution keys on this, never on the DN.
pub const ATTR_ENTRY_UUID: &str = "entryuuid";

/// Pseudo attribute name under which DN-level operations (add, moddn) are
/// tracked in the historical attribute.
pub const ATTR_DN_PSEUDO: &str = "dn";

/// Length in characters of the textual CSN encoding.
pub const CSN_TEXT_LEN: usize = 28;
