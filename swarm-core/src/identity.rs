//! Peer identity: opaque 32-bit handle assigned by the transport.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifies a remote endpoint. `PeerId::INVALID` (0) means "no peer".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl PeerId {
    pub const INVALID: PeerId = PeerId(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for PeerId {
    fn from(raw: u32) -> Self {
        PeerId(raw)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decimal form, as typed on the console. "0" parses to `INVALID`.
impl FromStr for PeerId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(PeerId)
    }
}
