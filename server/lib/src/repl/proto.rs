//! The wire form of replicated updates. Every message carries the csn that
//! stamps the change and the uuid that identifies its target; the dn is
//! advisory and may be stale by the time the message is replayed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entry::{Dn, Rdn};
use crate::modify::ModifyList;
use crate::repl::csn::Csn;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReplUpdateMessage {
    Add {
        csn: Csn,
        uuid: Uuid,
        dn: Dn,
        /// The uuid of the intended parent, used to relocate the add when
        /// the parent was renamed on another replica.
        parent_uuid: Option<Uuid>,
        attrs: Vec<(String, Vec<String>)>,
    },
    Modify {
        csn: Csn,
        uuid: Uuid,
        dn: Dn,
        mods: ModifyList,
    },
    Delete {
        csn: Csn,
        uuid: Uuid,
        dn: Dn,
    },
    ModifyDn {
        csn: Csn,
        uuid: Uuid,
        dn: Dn,
        new_rdn: Rdn,
        delete_old_rdn: bool,
        new_superior: Option<Dn>,
    },
}

impl ReplUpdateMessage {
    pub fn csn(&self) -> &Csn {
        match self {
            ReplUpdateMessage::Add { csn, .. }
            | ReplUpdateMessage::Modify { csn, .. }
            | ReplUpdateMessage::Delete { csn, .. }
            | ReplUpdateMessage::ModifyDn { csn, .. } => csn,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            ReplUpdateMessage::Add { uuid, .. }
            | ReplUpdateMessage::Modify { uuid, .. }
            | ReplUpdateMessage::Delete { uuid, .. }
            | ReplUpdateMessage::ModifyDn { uuid, .. } => *uuid,
        }
    }

    pub fn dn(&self) -> &Dn {
        match self {
            ReplUpdateMessage::Add { dn, .. }
            | ReplUpdateMessage::Modify { dn, .. }
            | ReplUpdateMessage::Delete { dn, .. }
            | ReplUpdateMessage::ModifyDn { dn, .. } => dn,
        }
    }
}
