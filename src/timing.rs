//! Expiring-links clock-offset and delay estimation.
//!
//! Each peer maintains a running mean and mean-absolute-deviation of clock
//! offset `O` and one-way delay `D`, fed from `Ack` round-trips. This uses a
//! plain weighted-average update rather than Welford's algorithm, to pin
//! down the exact growth of `n` and the "shrinks as samples agree" shape of
//! `stddev`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::address::PeerAddress;

/// A running mean/mean-absolute-deviation estimate of one quantity (offset or
/// delay) to one peer. `n == 0` is the sentinel "no info" state.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Stat {
    pub avg: f64,
    pub stddev: f64,
    pub n: u32,
}

impl Stat {
    /// Folds one new sample `x` into the running estimate.
    ///
    /// `avg' = (avg*n + x) / (n+1)`, then
    /// `stddev' = (stddev*n + |x - avg'|) / (n+1)` — note the absolute
    /// deviation term uses the *updated* average, not the prior one.
    fn observe(self, x: f64) -> Stat {
        let n = self.n as f64;
        let avg = (self.avg * n + x) / (n + 1.0);
        let stddev = (self.stddev * n + (x - avg).abs()) / (n + 1.0);
        Stat {
            avg,
            stddev,
            n: self.n + 1,
        }
    }
}

/// Offset and delay estimates for one peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerTiming {
    pub offset: Stat,
    pub delay: Stat,
}

/// Per-peer clock-offset/delay estimator backing the expiring-links variants.
///
/// Touched only from the message-handler task, so it needs no lock for
/// correctness across threads. It is still wrapped in a `Mutex` here
/// because the elector hands out
/// shared references to it (e.g. for `task0` to read current estimates while
/// the handler task concurrently updates them from `Ack`s); the lock is
/// never held across an `.await`.
pub struct Estimator {
    peers: Mutex<HashMap<PeerAddress, PeerTiming>>,
}

/// Allowed deviation multiplier in `discard()`. Widened implicitly when
/// fewer than 10 samples are available (see `discard`).
const K: f64 = 3.0;
const MIN_RELIABLE_SAMPLES: u32 = 10;

impl Estimator {
    pub fn new() -> Self {
        Estimator {
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Current offset/delay estimate for `peer`, or the all-zero sentinel if
    /// nothing has been observed yet.
    pub fn get(&self, peer: PeerAddress) -> PeerTiming {
        self.peers.lock().unwrap().get(&peer).copied().unwrap_or_default()
    }

    /// Folds one `Ack` round-trip sample into the estimate for `src`.
    ///
    /// `msg_ts` (`t1`, when we sent the original message), `msg_rcv_ts`
    /// (`t2`, when the peer received it), `ack_ts` (`t3`, when the peer sent
    /// the Ack) and `now` (`t4`, when we received the Ack).
    pub fn observe_ack(&self, src: PeerAddress, msg_ts: f64, msg_rcv_ts: f64, ack_ts: f64, now: f64) {
        let delay = ((now - msg_ts) - (ack_ts - msg_rcv_ts)) / 2.0;
        let offset = ((msg_rcv_ts - msg_ts) + (ack_ts - now)) / 2.0;

        let mut peers = self.peers.lock().unwrap();
        let entry = peers.entry(src).or_default();
        entry.offset = entry.offset.observe(offset);
        entry.delay = entry.delay.observe(delay);
    }

    /// Overwrites the estimate for `src` with an authoritative value
    /// distributed by the leader in an `Ok` message.
    pub fn adopt_leader_estimate(&self, src: PeerAddress, offset: Stat, delay: Stat) {
        let mut peers = self.peers.lock().unwrap();
        peers.insert(src, PeerTiming { offset, delay });
    }

    /// Whether a message timestamped `msg_timestamp` and observed locally at
    /// `now`, from `src`, should be discarded as arriving too late relative
    /// to link budget `d`.
    ///
    /// Accepts (returns `false`) unconditionally when nothing is known about
    /// `src` yet — an unknown peer cannot yet be held to a delay estimate.
    pub fn discard(&self, src: PeerAddress, msg_timestamp: f64, now: f64, d: Duration) -> bool {
        let timing = self.get(src);
        let delay = timing.delay;
        if delay.n == 0 {
            return false;
        }

        let mut k = K;
        let stddev = if delay.n < MIN_RELIABLE_SAMPLES {
            delay.avg / 3.0
        } else {
            delay.stddev
        };
        if delay.avg < 0.0 {
            k = -k;
        }

        let estimated_delay = (now - msg_timestamp) + (delay.avg + k * stddev);
        estimated_delay > d.as_secs_f64()
    }
}

impl Default for Estimator {
    fn default() -> Self {
        Self::new()
    }
}
