use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// A peer's transport address, normalized so that independently-received
/// encodings of the same address always compare equal.
///
/// The wire form is a two-element `[host, port]` sequence; deserializing
/// straight into `SocketAddr` would accept that shape already, but we keep a
/// newtype so every place that needs "the address" in a membership
/// comparison goes through one normalized type instead of risking a
/// list-vs-tuple mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "(IpAddr, u16)", from = "(IpAddr, u16)")]
pub struct PeerAddress(SocketAddr);

impl PeerAddress {
    pub fn new(addr: SocketAddr) -> Self {
        PeerAddress(addr)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        PeerAddress(addr)
    }
}

impl From<PeerAddress> for SocketAddr {
    fn from(addr: PeerAddress) -> Self {
        addr.0
    }
}

impl From<(IpAddr, u16)> for PeerAddress {
    fn from((host, port): (IpAddr, u16)) -> Self {
        PeerAddress(SocketAddr::new(host, port))
    }
}

impl From<PeerAddress> for (IpAddr, u16) {
    fn from(addr: PeerAddress) -> Self {
        (addr.0.ip(), addr.0.port())
    }
}

/// Total order on addresses: IP first, then port. Every process computes the
/// same sorted membership index for the same set of addresses from this
/// order alone — insertion order must never matter.
impl PartialOrd for PeerAddress {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerAddress {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.0.ip(), self.0.port()).cmp(&(other.0.ip(), other.0.port()))
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peer's position in the sorted membership table. Kept distinct from a
/// raw `usize` at API boundaries that hand out or accept "this peer's
/// index" (`LeaderView`, `Elector::leader`), so the type checker — not a
/// reviewer — catches an accidental mixup with a round number or a raw
/// vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessIndex(usize);

impl ProcessIndex {
    pub fn new(idx: usize) -> Self {
        ProcessIndex(idx)
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl From<usize> for ProcessIndex {
    fn from(idx: usize) -> Self {
        ProcessIndex(idx)
    }
}

impl From<ProcessIndex> for usize {
    fn from(idx: ProcessIndex) -> Self {
        idx.0
    }
}

impl std::fmt::Display for ProcessIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
