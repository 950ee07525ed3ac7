use std::sync::Mutex;

use crate::address::ProcessIndex;
use crate::observer::LeaderView;

/// `r` and `leader`: written only from the dispatcher loop, but
/// read from other threads via the [`crate::Elector`] handle's public
/// accessors, so they're grouped behind one lock rather than left as bare
/// fields (`okcount` is purely internal to the dispatcher loop and is not
/// kept here — nothing outside the loop ever reads it).
pub struct RoundState {
    inner: Mutex<Fields>,
}

struct Fields {
    round: u64,
    leader: Option<ProcessIndex>,
}

impl RoundState {
    pub fn new() -> Self {
        RoundState {
            inner: Mutex::new(Fields {
                round: 0,
                leader: None,
            }),
        }
    }

    pub fn round(&self) -> u64 {
        self.inner.lock().unwrap().round
    }

    pub fn leader(&self) -> Option<ProcessIndex> {
        self.inner.lock().unwrap().leader
    }

    /// Sets round and leader atomically with respect to other readers, and
    /// returns the resulting view for the caller to hand to the observer.
    pub fn set(&self, local_index: ProcessIndex, round: u64, leader: Option<ProcessIndex>) -> LeaderView {
        let mut fields = self.inner.lock().unwrap();
        fields.round = round;
        fields.leader = leader;
        LeaderView {
            local_index,
            round,
            leader,
        }
    }
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new()
    }
}
