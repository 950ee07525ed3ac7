//! The public elector handle.

mod run;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::address::{PeerAddress, ProcessIndex};
use crate::error::{ElectorError, Result};
use crate::membership::Membership;
use crate::message::Message;
use crate::observer::Observer;
use crate::timing::Estimator;
use crate::transport::Transport;

use run::Inner;
use state::RoundState;

/// Which of the four algorithm variants an elector runs.
///
/// `ack_ratio` must lie in `(0, 1)` exclusive; use [`Algorithm::expiring_links`]
/// or [`Algorithm::alerting`] rather than constructing these variants
/// directly, so that contract is checked in one place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Algorithm {
    /// Non-stable, reliable links: `leader := round mod n` the instant a
    /// round starts, with no confirmation delay.
    Basic,
    /// Stable, reliable links: leader confirmed only after two `Ok`s from
    /// the round's designated leader.
    Stable,
    /// O(n) election time, stable, with lossy-link tolerance via expiring
    /// links (clock-offset/delay estimation and a `discard()` filter).
    ExpiringLinks { ack_ratio: f64 },
    /// O(1) election time, stable, with bounded latency via `Alert`
    /// broadcasts run alongside the expiring-links machinery.
    Alerting { ack_ratio: f64 },
}

impl Algorithm {
    pub fn expiring_links(ack_ratio: f64) -> Result<Algorithm> {
        validate_ack_ratio(ack_ratio)?;
        Ok(Algorithm::ExpiringLinks { ack_ratio })
    }

    pub fn alerting(ack_ratio: f64) -> Result<Algorithm> {
        validate_ack_ratio(ack_ratio)?;
        Ok(Algorithm::Alerting { ack_ratio })
    }

    pub(crate) fn is_lossy(&self) -> bool {
        matches!(self, Algorithm::ExpiringLinks { .. } | Algorithm::Alerting { .. })
    }

    pub(crate) fn is_o1(&self) -> bool {
        matches!(self, Algorithm::Alerting { .. })
    }
}

fn validate_ack_ratio(ratio: f64) -> Result<()> {
    if ratio > 0.0 && ratio < 1.0 {
        Ok(())
    } else {
        Err(ElectorError::Configuration(format!(
            "ackratio must lie in (0, 1), got {ratio}"
        )))
    }
}

/// Configuration for [`Elector::spawn`].
pub struct ElectorConfig {
    pub algorithm: Algorithm,
    /// Other peers known at startup; the local address is added
    /// automatically if absent.
    pub peers: Vec<PeerAddress>,
    /// The round-timeout budget `2d`; `d` itself (the heartbeat period and
    /// the lossy variants' link budget) is half of it.
    pub timeout: Duration,
    pub observer: Arc<dyn Observer>,
}

/// A running instance of the election protocol.
///
/// Cheap to query from any thread: [`Elector::round`] and [`Elector::leader`]
/// read a small lock-protected struct shared with the dispatcher task, never
/// the task itself.
pub struct Elector {
    local: PeerAddress,
    membership: Arc<Membership>,
    state: Arc<RoundState>,
    close_notify: Arc<Notify>,
    join: std::sync::Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Elector {
    /// Spawns the dispatcher loop over `transport` per `config`, entering
    /// round 0 before returning.
    pub async fn spawn(transport: Arc<dyn Transport>, config: ElectorConfig) -> Result<Elector> {
        let local = transport.local_addr();
        let membership = Arc::new(Membership::new(local, config.peers));
        if membership.len() < 2 {
            tracing::warn!(
                local = %local,
                "fewer than two known peers; this process cannot yet say Hello to anyone"
            );
        }

        let state = Arc::new(RoundState::new());
        let close_notify = Arc::new(Notify::new());

        if config.timeout.is_zero() {
            return Err(ElectorError::Configuration("timeout must be positive".into()));
        }
        let d = config.timeout / 2;

        // Seed membership: announce ourselves to everyone we already know
        // about.
        for peer in membership.snapshot() {
            if peer == local {
                continue;
            }
            if let Err(e) = transport.send_to(peer, &Message::Hello { address: local }).await {
                if config.algorithm.is_lossy() {
                    tracing::warn!(error = %e, %peer, "initial Hello failed, ignoring");
                } else {
                    return Err(e);
                }
            }
        }

        let inner = Inner {
            local,
            membership: membership.clone(),
            shared_state: state.clone(),
            observer: config.observer,
            transport,
            algorithm: config.algorithm,
            d,
            timeout: config.timeout,
            estimator: Estimator::new(),
            round: 0,
            leader: None,
            okcount: 0,
            ack_countdown: 1,
            last_alert: (0, 0.0),
            timer1_deadline: tokio::time::Instant::now() + config.timeout,
        };

        let join = tokio::spawn(run::run_loop(inner, close_notify.clone()));

        Ok(Elector {
            local,
            membership,
            state,
            close_notify,
            join: std::sync::Mutex::new(Some(join)),
        })
    }

    pub fn local_address(&self) -> PeerAddress {
        self.local
    }

    pub fn round(&self) -> u64 {
        self.state.round()
    }

    pub fn leader(&self) -> Option<ProcessIndex> {
        self.state.leader()
    }

    pub fn is_local_leader(&self) -> bool {
        self.leader() == Some(self.local_index())
    }

    pub fn local_index(&self) -> ProcessIndex {
        ProcessIndex::from(self.membership.local_index())
    }

    pub fn peers(&self) -> Vec<PeerAddress> {
        self.membership.snapshot()
    }

    /// Adds a peer directly to the local membership table, without going
    /// through a `Hello` exchange. Mostly useful for test setup; in a live
    /// deployment peers are usually learned via `Hello`.
    pub fn add_peer(&self, addr: PeerAddress) {
        self.membership.add(addr);
    }

    pub fn remove_peer(&self, addr: PeerAddress) {
        self.membership.remove(addr);
    }

    /// Signals the dispatcher loop to stop, lets it send its closing `Bye`
    /// courtesy message, and waits for it to exit.
    pub async fn close(&self) {
        self.close_notify.notify_one();
        let handle = self.join.lock().unwrap().take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "dispatcher loop exited with an error"),
                Err(e) => tracing::warn!(error = %e, "dispatcher task panicked"),
            }
        }
    }
}
