//! The observer hook: a single-method callback surface invoked whenever the
//! believed leader changes.

use crate::address::ProcessIndex;

/// A consistent view of an elector's round/leader state at the moment the
/// observer was notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderView {
    /// This process' own index in the sorted membership table.
    pub local_index: ProcessIndex,
    /// The current round.
    pub round: u64,
    /// The currently believed leader index, or `None`.
    pub leader: Option<ProcessIndex>,
}

impl LeaderView {
    /// Whether this process currently believes itself to be the leader.
    pub fn is_local_leader(&self) -> bool {
        self.leader == Some(self.local_index)
    }
}

/// Notified on the dispatcher task whenever [`LeaderView::leader`] changes
/// (confirmed, cleared, or reassigned). Implementations must not block or
/// panic; a panic is caught and logged at the elector boundary but still
/// indicates a bug in the observer.
///
/// Kept to a single method rather than a richer set of lifecycle hooks —
/// one callback is enough to drive any downstream reaction to a leader
/// change.
pub trait Observer: Send + Sync {
    fn notify(&self, view: LeaderView);
}

/// An observer that discards every notification. Useful as a default when
/// the caller only cares about polling [`crate::Elector::leader`] directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn notify(&self, _view: LeaderView) {}
}
