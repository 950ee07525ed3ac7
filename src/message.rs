//! The wire message algebra.
//!
//! A single tagged enum serves all four variants; fields a given algorithm
//! does not use are `None`. One tagged union with exhaustive matching is
//! easier to keep consistent than one message type per variant.

use serde::{Deserialize, Serialize};

use crate::address::PeerAddress;
use crate::timing::Stat;

/// Clock-offset/delay estimates a leader distributes to a follower in an
/// `Ok` message (lossy variants only).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingEstimate {
    pub offset: Stat,
    pub delay: Stat,
}

/// The recognized wire tags, serialized with an internally tagged `"type"`
/// discriminator field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Sent by any process to the designated leader of `round` (reliable
    /// variants), or broadcast to all peers (lossy variants).
    Start {
        round: u64,
        /// Present in the lossy variants only.
        timestamp: Option<f64>,
    },

    /// Broadcast by the leader of `round`.
    Ok {
        round: u64,
        /// `peers.is_some()` iff the leader's membership table was dirty
        /// (stable reliable variant) or this is the O(1) variant, which
        /// always includes the full list. `peer_count` is always the
        /// leader's membership cardinality, used by followers to detect a
        /// changed-but-unreported peer count.
        peer_count: usize,
        peers: Option<Vec<PeerAddress>>,
        /// Present in the lossy variants only.
        timing: Option<TimingEstimate>,
        /// Present in the lossy variants only: the send timestamp used by
        /// the receiver's expiring-links `discard()` check.
        timestamp: Option<f64>,
    },

    /// Sent by a follower to the old leader when it times out (stable
    /// reliable variant only).
    Stop { round: u64 },

    /// Broadcast by the initiator of a new round (O(1) variant only).
    Alert { round: u64, timestamp: f64 },

    /// Sent by a follower to the leader, sampling the round-trip needed to
    /// maintain the expiring-links estimator (lossy variants only).
    Ack {
        round: u64,
        timestamp: f64,
        msg_ts: f64,
        msg_rcv_ts: f64,
    },

    /// Announces a new peer's address, broadcast or forwarded toward the
    /// believed leader.
    Hello { address: PeerAddress },

    /// Announces a departing peer's address, broadcast or forwarded toward
    /// the believed leader.
    Bye { address: PeerAddress },
}

impl Message {
    /// The round this message pertains to, for messages that carry one.
    pub fn round(&self) -> Option<u64> {
        match self {
            Message::Start { round, .. }
            | Message::Ok { round, .. }
            | Message::Stop { round, .. }
            | Message::Alert { round, .. }
            | Message::Ack { round, .. } => Some(*round),
            Message::Hello { .. } | Message::Bye { .. } => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Message::Start { .. } => "Start",
            Message::Ok { .. } => "Ok",
            Message::Stop { .. } => "Stop",
            Message::Alert { .. } => "Alert",
            Message::Ack { .. } => "Ack",
            Message::Hello { .. } => "Hello",
            Message::Bye { .. } => "Bye",
        }
    }
}
