use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use dirsyncd_proto::constants::CSN_TEXT_LEN;
use dirsyncd_proto::internal::OperationError;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Eq, PartialOrd, Ord, Hash)]
pub struct Csn {
    // Mental note: Derive ord always checks in order of struct fields.
    pub ts: Duration,
    pub seq: u32,
    pub replica_id: u16,
}

impl fmt::Display for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Fixed width hex, millisecond timestamp first. The string sorts in
        // exactly the same order as the derived Ord above, which is what
        // allows the historical attribute to be compared as text.
        write!(
            f,
            "{:016x}{:08x}{:04x}",
            self.ts.as_millis(),
            self.seq,
            self.replica_id
        )
    }
}

impl FromStr for Csn {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != CSN_TEXT_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(OperationError::InvalidReplChangeId);
        }
        let ts = u64::from_str_radix(&s[0..16], 16)
            .map_err(|_| OperationError::InvalidReplChangeId)?;
        let seq = u32::from_str_radix(&s[16..24], 16)
            .map_err(|_| OperationError::InvalidReplChangeId)?;
        let replica_id = u16::from_str_radix(&s[24..28], 16)
            .map_err(|_| OperationError::InvalidReplChangeId)?;
        Ok(Csn {
            ts: Duration::from_millis(ts),
            seq,
            replica_id,
        })
    }
}

impl Csn {
    pub fn new(ts: Duration, seq: u32, replica_id: u16) -> Self {
        Csn {
            ts,
            seq,
            replica_id,
        }
    }

    /// Construct a csn at a whole-second timestamp with zeroed sequence and
    /// replica.
    #[cfg(test)]
    pub(crate) fn at(secs: u64) -> Self {
        Csn {
            ts: Duration::from_secs(secs),
            seq: 0,
            replica_id: 0,
        }
    }
}

/// Per replica csn source. Guarantees strictly increasing output even when
/// the wall clock stalls or steps backwards, by advancing the sequence
/// number instead of the timestamp.
#[derive(Debug, Clone)]
pub struct CsnGenerator {
    replica_id: u16,
    last_ts: Duration,
    last_seq: u32,
}

impl CsnGenerator {
    pub fn new(replica_id: u16) -> Self {
        CsnGenerator {
            replica_id,
            last_ts: Duration::ZERO,
            last_seq: 0,
        }
    }

    /// Emit the next csn for the provided current time. `now` may regress,
    /// the output never does.
    pub fn new_csn(&mut self, now: Duration) -> Csn {
        if now > self.last_ts {
            self.last_ts = now;
            self.last_seq = 0;
        } else {
            match self.last_seq.checked_add(1) {
                Some(seq) => self.last_seq = seq,
                None => {
                    // Sequence exhausted within one millisecond, step time.
                    self.last_ts += Duration::from_millis(1);
                    self.last_seq = 0;
                }
            }
        }
        Csn {
            ts: self.last_ts,
            seq: self.last_seq,
            replica_id: self.replica_id,
        }
    }
}
