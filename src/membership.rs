use std::sync::Mutex;

use crate::address::PeerAddress;

/// The sorted sequence of known peer addresses, plus the dirty flag that
/// tracks whether the table has changed since the last time it was
/// broadcast in an `Ok` message.
///
/// Always contains the local address. Protected by a plain `Mutex` — every
/// critical section here is a short, synchronous vector operation, never an
/// `.await`, so there is no reason to reach for an async mutex.
pub struct Membership {
    inner: Mutex<Inner>,
    local: PeerAddress,
}

struct Inner {
    peers: Vec<PeerAddress>,
    dirty: bool,
}

impl Membership {
    /// Creates a table seeded with `local` and `initial_peers`, sorted.
    pub fn new(local: PeerAddress, initial_peers: impl IntoIterator<Item = PeerAddress>) -> Self {
        let mut peers: Vec<PeerAddress> = initial_peers.into_iter().collect();
        if !peers.contains(&local) {
            peers.push(local);
        }
        peers.sort();
        peers.dedup();
        Membership {
            inner: Mutex::new(Inner {
                peers,
                dirty: false,
            }),
            local,
        }
    }

    pub fn local(&self) -> PeerAddress {
        self.local
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// This process' index within the sorted sequence. The local address is
    /// always present, so this never fails.
    pub fn local_index(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .peers
            .binary_search(&self.local)
            .expect("local address always present in membership table")
    }

    /// Adds `peer` if unknown, marking the table dirty. Thread-safe.
    pub fn add(&self, peer: PeerAddress) {
        let mut inner = self.inner.lock().unwrap();
        if let Err(idx) = inner.peers.binary_search(&peer) {
            inner.peers.insert(idx, peer);
            inner.dirty = true;
        }
    }

    /// Removes `peer` if known, marking the table dirty. Thread-safe.
    pub fn remove(&self, peer: PeerAddress) {
        let mut inner = self.inner.lock().unwrap();
        if let Ok(idx) = inner.peers.binary_search(&peer) {
            inner.peers.remove(idx);
            inner.dirty = true;
        }
    }

    /// Replaces the whole table (used when a follower resynchronizes from a
    /// leader's full peer list in an `Ok` message). Does not mark dirty:
    /// adopting the leader's view is not a local modification to broadcast.
    pub fn replace(&self, peers: Vec<PeerAddress>) {
        let mut inner = self.inner.lock().unwrap();
        let mut peers = peers;
        peers.sort();
        peers.dedup();
        inner.peers = peers;
    }

    /// Whether `peer` is currently a known member.
    pub fn contains(&self, peer: PeerAddress) -> bool {
        self.inner.lock().unwrap().peers.binary_search(&peer).is_ok()
    }

    /// The address at sorted index `idx`, if any.
    pub fn address_at(&self, idx: usize) -> Option<PeerAddress> {
        self.inner.lock().unwrap().peers.get(idx).copied()
    }

    /// True if the table has changed since the last `snapshot_clearing_dirty`.
    pub fn is_dirty(&self) -> bool {
        self.inner.lock().unwrap().dirty
    }

    /// Forces the dirty flag on regardless of whether the table actually
    /// changed. A retransmitted Hello/Bye from a peer that thinks it is
    /// missing an update must still re-trigger full-list redistribution on
    /// the next `Ok`, even if the local table already agrees with it.
    pub fn mark_dirty(&self) {
        self.inner.lock().unwrap().dirty = true;
    }

    /// Atomically clones the list and clears the dirty flag.
    pub fn snapshot_clearing_dirty(&self) -> Vec<PeerAddress> {
        let mut inner = self.inner.lock().unwrap();
        inner.dirty = false;
        inner.peers.clone()
    }

    /// A stable snapshot without touching the dirty flag.
    pub fn snapshot(&self) -> Vec<PeerAddress> {
        self.inner.lock().unwrap().peers.clone()
    }
}
