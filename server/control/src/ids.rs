use std::fmt;

use serde::{Deserialize, Serialize};

/// Small integer id, unique for the server's lifetime, assigned monotonically.
/// Id 0 is reserved for the local host participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u32);

impl ParticipantId {
    pub const LOCAL_HOST: ParticipantId = ParticipantId(0);
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
