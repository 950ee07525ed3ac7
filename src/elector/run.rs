//! The dispatcher loop: task 0 (heartbeat), task 1 (round timeout) and the
//! message handlers, collapsed onto one cooperative `tokio` task per
//! elector as long as observable orderings are preserved. Because only this
//! one task ever mutates `round`/`leader`/`okcount`/the estimator/`last_alert`, every
//! state transition triggered by a single incoming message is trivially
//! atomic with respect to other handlers — there is no second handler to
//! race with.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::address::{PeerAddress, ProcessIndex};
use crate::error::Result;
use crate::membership::Membership;
use crate::message::{Message, TimingEstimate};
use crate::observer::{LeaderView, Observer};
use crate::timing::Estimator;
use crate::transport::Transport;

use super::state::RoundState;
use super::Algorithm;

fn now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs_f64()
}

pub(super) struct Inner {
    pub local: PeerAddress,
    pub membership: Arc<Membership>,
    pub shared_state: Arc<RoundState>,
    pub observer: Arc<dyn Observer>,
    pub transport: Arc<dyn Transport>,
    pub algorithm: Algorithm,
    pub d: Duration,
    pub timeout: Duration,
    pub estimator: Estimator,
    pub round: u64,
    pub leader: Option<ProcessIndex>,
    pub okcount: u8,
    pub ack_countdown: u64,
    pub last_alert: (u64, f64),
    pub timer1_deadline: tokio::time::Instant,
}

impl Inner {
    fn local_index(&self) -> ProcessIndex {
        ProcessIndex::from(self.membership.local_index())
    }

    fn publish(&mut self, round: u64, leader: Option<ProcessIndex>) {
        self.round = round;
        self.leader = leader;
        let local_index = self.local_index();
        let view = self.shared_state.set(local_index, round, leader);
        self.notify_observer(view);
    }

    fn notify_observer(&self, view: LeaderView) {
        let observer = self.observer.clone();
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer.notify(view))).is_err() {
            tracing::error!("observer panicked in notify(); swallowing");
        }
    }

    fn confirm_leader(&mut self) {
        let n = self.membership.len() as u64;
        let l = (self.round % n) as usize;
        self.publish(self.round, Some(ProcessIndex::from(l)));
    }

    fn arm_timer1(&mut self) {
        self.timer1_deadline = tokio::time::Instant::now() + self.timeout;
    }

    /// Sends `msg` to `dest`, applying the variant's send-failure policy:
    /// fatal in reliable variants, logged and swallowed in lossy ones.
    async fn deliver(&self, dest: PeerAddress, msg: Message) -> Result<()> {
        match self.transport.send_to(dest, &msg).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.algorithm.is_lossy() {
                    tracing::warn!(error = %e, dest = %dest, "send failed, ignoring on lossy link");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn broadcast(&self, msg: Message) -> Result<()> {
        for dest in self.membership.snapshot() {
            self.deliver(dest, msg.clone()).await?;
        }
        Ok(())
    }

    /// Round starter.
    pub(super) async fn start_round(&mut self, s: u64) -> Result<()> {
        let n = self.membership.len() as u64;
        let l = (s % n) as usize;
        let local_index = self.local_index();
        let l_idx = ProcessIndex::from(l);

        if self.algorithm.is_o1() {
            self.broadcast(Message::Alert {
                round: s,
                timestamp: now_secs(),
            })
            .await?;
        }

        if local_index != l_idx {
            match self.algorithm {
                Algorithm::Basic | Algorithm::Stable => {
                    if let Some(dest) = self.membership.address_at(l) {
                        self.deliver(
                            dest,
                            Message::Start {
                                round: s,
                                timestamp: None,
                            },
                        )
                        .await?;
                    }
                }
                Algorithm::ExpiringLinks { .. } | Algorithm::Alerting { .. } => {
                    self.broadcast(Message::Start {
                        round: s,
                        timestamp: Some(now_secs()),
                    })
                    .await?;
                }
            }
        }

        // The basic variant sets leader := l immediately; the
        // stable variants set leader := None and wait for two `Ok`s.
        let leader = if matches!(self.algorithm, Algorithm::Basic) {
            Some(l_idx)
        } else {
            None
        };
        self.publish(s, leader);
        self.arm_timer1();
        Ok(())
    }

    /// Task 0, the heart-beat.
    pub(super) async fn task0(&mut self) -> Result<()> {
        let n = self.membership.len() as u64;
        let local_index = self.membership.local_index() as u64;
        if local_index == self.round % n {
            self.broadcast_ok().await?;
        }
        Ok(())
    }

    async fn broadcast_ok(&mut self) -> Result<()> {
        match self.algorithm {
            Algorithm::Basic | Algorithm::Stable => {
                let dirty = self.membership.is_dirty();
                let peers = self.membership.snapshot_clearing_dirty();
                let peer_count = peers.len();
                let msg = Message::Ok {
                    round: self.round,
                    peer_count,
                    peers: if dirty { Some(peers) } else { None },
                    timing: None,
                    timestamp: None,
                };
                self.broadcast(msg).await
            }
            Algorithm::ExpiringLinks { .. } => {
                for dest in self.membership.snapshot() {
                    let timing = self.estimator.get(dest);
                    let msg = Message::Ok {
                        round: self.round,
                        peer_count: 0,
                        peers: None,
                        timing: Some(TimingEstimate {
                            offset: timing.offset,
                            delay: timing.delay,
                        }),
                        timestamp: Some(now_secs()),
                    };
                    self.deliver(dest, msg).await?;
                }
                Ok(())
            }
            Algorithm::Alerting { .. } => {
                let peers = self.membership.snapshot();
                let peer_count = peers.len();
                for dest in peers.clone() {
                    let timing = self.estimator.get(dest);
                    let msg = Message::Ok {
                        round: self.round,
                        peer_count,
                        peers: Some(peers.clone()),
                        timing: Some(TimingEstimate {
                            offset: timing.offset,
                            delay: timing.delay,
                        }),
                        timestamp: Some(now_secs()),
                    };
                    self.deliver(dest, msg).await?;
                }
                Ok(())
            }
        }
    }

    /// Task 1, the round timeout.
    pub(super) async fn task1(&mut self) -> Result<()> {
        tracing::info!(round = self.round, "timed out waiting for leader Ok");
        self.okcount = 0;
        if matches!(self.algorithm, Algorithm::Stable) {
            let n = self.membership.len() as u64;
            let l = (self.round % n) as usize;
            if let Some(dest) = self.membership.address_at(l) {
                self.deliver(
                    dest,
                    Message::Stop {
                        round: self.round,
                    },
                )
                .await?;
            }
        }
        self.start_round(self.round + 1).await
    }

    pub(super) async fn handle_message(&mut self, src: PeerAddress, msg: Message) -> Result<()> {
        match msg {
            Message::Start { round, timestamp } => self.handle_start(src, round, timestamp).await,
            Message::Ok {
                round,
                peer_count,
                peers,
                timing,
                timestamp,
            } => {
                self.handle_ok(src, round, peer_count, peers, timing, timestamp)
                    .await
            }
            Message::Stop { round } => self.handle_stop(src, round).await,
            Message::Alert { round, timestamp } => self.handle_alert(src, round, timestamp).await,
            Message::Ack {
                round,
                timestamp,
                msg_ts,
                msg_rcv_ts,
            } => {
                self.handle_ack(src, round, timestamp, msg_ts, msg_rcv_ts)
                    .await
            }
            Message::Hello { address } => self.handle_hello(address).await,
            Message::Bye { address } => self.handle_bye(address).await,
        }
    }

    /// `Start` handler.
    async fn handle_start(&mut self, src: PeerAddress, round: u64, timestamp: Option<f64>) -> Result<()> {
        if self.algorithm.is_lossy() {
            let now = now_secs();
            let ts = timestamp.unwrap_or(now);
            if self.estimator.discard(src, ts, now, self.d) {
                tracing::debug!(%src, round, "discarding stale Start");
                return Ok(());
            }
        }

        // Accept Start from an unknown source and add it to membership
        // unconditionally.
        self.membership.add(src);

        let r = self.round;
        if round > r {
            self.okcount = 0;
            self.start_round(round).await?;
        } else if round < r && self.algorithm.is_lossy() {
            self.deliver(
                src,
                Message::Start {
                    round: r,
                    timestamp: Some(now_secs()),
                },
            )
            .await?;
        }
        Ok(())
    }

    /// `Ok` handler, including the O(1) variant's extra alert-freshness
    /// check.
    async fn handle_ok(
        &mut self,
        src: PeerAddress,
        round: u64,
        peer_count: usize,
        peers: Option<Vec<PeerAddress>>,
        timing: Option<TimingEstimate>,
        timestamp: Option<f64>,
    ) -> Result<()> {
        let recv_ts = now_secs();

        // Unknown-peer policy: Stable/ExpiringLinks drop Ok
        // from an unknown source; Basic never checks; the O(1) variant
        // deliberately accepts from unknown sources so a just-introduced
        // leader can reach a peer it only just learned about.
        if matches!(self.algorithm, Algorithm::Stable | Algorithm::ExpiringLinks { .. })
            && !self.membership.contains(src)
        {
            tracing::warn!(%src, round, "Ok from unknown peer, dropping");
            return Ok(());
        }

        if self.algorithm.is_lossy() {
            if let Some(t) = timing {
                self.estimator.adopt_leader_estimate(src, t.offset, t.delay);
            }
            let ts = timestamp.unwrap_or(recv_ts);
            if self.estimator.discard(src, ts, recv_ts, self.d) {
                tracing::debug!(%src, round, "discarding stale Ok");
                return Ok(());
            }
        }

        match self.algorithm {
            Algorithm::Basic | Algorithm::Stable => {
                if let Some(full) = peers {
                    self.membership.replace(full);
                } else if peer_count != self.membership.len() {
                    if let Some(l) = self.leader {
                        if let Some(dest) = self.membership.address_at(l.get()) {
                            self.deliver(dest, Message::Hello { address: self.local }).await?;
                        }
                    }
                }
            }
            Algorithm::Alerting { .. } => {
                if let Some(full) = peers {
                    self.membership.replace(full);
                }
            }
            Algorithm::ExpiringLinks { .. } => {}
        }

        let r = self.round;
        match self.algorithm {
            Algorithm::Basic => {
                if round == r {
                    self.arm_timer1();
                } else if round > r {
                    self.start_round(round).await?;
                }
            }
            Algorithm::Stable => {
                if round == r {
                    self.okcount += 1;
                    if self.leader.is_none() && self.okcount == 2 {
                        self.okcount = 0;
                        self.confirm_leader();
                    }
                    self.arm_timer1();
                } else if round > r {
                    self.okcount = 0;
                    self.start_round(round).await?;
                }
            }
            Algorithm::ExpiringLinks { .. } => {
                if round == r {
                    self.okcount += 1;
                    if self.leader.is_none() && self.okcount == 2 {
                        self.okcount = 0;
                        self.confirm_leader();
                    }
                    self.arm_timer1();
                } else if round > r {
                    self.okcount = 0;
                    self.start_round(round).await?;
                } else {
                    self.deliver(
                        src,
                        Message::Start {
                            round: r,
                            timestamp: Some(now_secs()),
                        },
                    )
                    .await?;
                }
                self.maybe_ack(src, round, timestamp.unwrap_or(recv_ts), recv_ts).await?;
            }
            Algorithm::Alerting { .. } => {
                if round == r {
                    self.okcount += 1;
                    let fresh = now_secs() - self.last_alert.1 > 6.0 * self.d.as_secs_f64()
                        || self.last_alert.0 <= round;
                    if self.leader.is_none() && self.okcount >= 2 && fresh {
                        self.okcount = 0;
                        self.confirm_leader();
                    }
                    self.arm_timer1();
                } else if round > r {
                    self.okcount = 0;
                    self.start_round(round).await?;
                } else {
                    self.deliver(
                        src,
                        Message::Start {
                            round: r,
                            timestamp: Some(now_secs()),
                        },
                    )
                    .await?;
                }
                self.maybe_ack(src, round, timestamp.unwrap_or(recv_ts), recv_ts).await?;
            }
        }

        Ok(())
    }

    /// `Stop` handler, stable reliable variant only.
    async fn handle_stop(&mut self, src: PeerAddress, round: u64) -> Result<()> {
        if !matches!(self.algorithm, Algorithm::Stable) {
            return Ok(());
        }
        if !self.membership.contains(src) {
            tracing::warn!(%src, round, "Stop from unknown peer, dropping");
            return Ok(());
        }
        if round >= self.round {
            self.start_round(round + 1).await?;
        }
        Ok(())
    }

    /// `Alert` handler, O(1) variant only.
    async fn handle_alert(&mut self, src: PeerAddress, round: u64, timestamp: f64) -> Result<()> {
        if !matches!(self.algorithm, Algorithm::Alerting { .. }) {
            return Ok(());
        }
        let now = now_secs();
        if self.estimator.discard(src, timestamp, now, self.d) {
            tracing::debug!(%src, round, "discarding stale Alert");
            return Ok(());
        }
        if !self.membership.contains(src) {
            tracing::warn!(%src, round, "Alert from unknown peer, dropping");
            return Ok(());
        }

        if round > self.round {
            self.leader = None;
            let local_index = self.local_index();
            let view = self.shared_state.set(local_index, self.round, None);
            self.notify_observer(view);
        }

        // Maximum under lexicographic (round, time) order.
        let candidate = (round, now);
        if candidate.0 > self.last_alert.0
            || (candidate.0 == self.last_alert.0 && candidate.1 > self.last_alert.1)
        {
            self.last_alert = candidate;
        }
        Ok(())
    }

    /// `Ack` handler, lossy variants only.
    async fn handle_ack(
        &mut self,
        src: PeerAddress,
        _round: u64,
        timestamp: f64,
        msg_ts: f64,
        msg_rcv_ts: f64,
    ) -> Result<()> {
        if !self.algorithm.is_lossy() {
            return Ok(());
        }
        if !self.membership.contains(src) {
            tracing::warn!(%src, "Ack from unknown peer, dropping");
            return Ok(());
        }
        let now = now_secs();
        self.estimator.observe_ack(src, msg_ts, msg_rcv_ts, timestamp, now);
        Ok(())
    }

    /// `Hello` handler.
    async fn handle_hello(&mut self, address: PeerAddress) -> Result<()> {
        let local_index = self.local_index();
        if self.leader == Some(local_index) {
            self.membership.add(address);
            // A retransmitted Hello must still force a full-list resync on
            // the next Ok even if this address was already known.
            self.membership.mark_dirty();
        } else if let Some(l) = self.leader {
            if let Some(dest) = self.membership.address_at(l.get()) {
                self.deliver(dest, Message::Hello { address }).await?;
            }
        }
        Ok(())
    }

    /// `Bye` handler.
    async fn handle_bye(&mut self, address: PeerAddress) -> Result<()> {
        let local_index = self.local_index();
        if self.leader == Some(local_index) {
            self.membership.remove(address);
            // Same reasoning as handle_hello: force the resync regardless of
            // whether this address was already absent.
            self.membership.mark_dirty();
        } else if let Some(l) = self.leader {
            if let Some(dest) = self.membership.address_at(l.get()) {
                self.deliver(dest, Message::Bye { address }).await?;
            }
        }
        Ok(())
    }

    /// Samples a round-trip with the leader per the configured `ackratio`:
    /// the first `Ok` is always acked, thereafter every `⌊1/ackratio⌋`-th
    /// one.
    async fn maybe_ack(&mut self, src: PeerAddress, round: u64, msg_ts: f64, msg_rcv_ts: f64) -> Result<()> {
        let ack_ratio = match self.algorithm {
            Algorithm::ExpiringLinks { ack_ratio } | Algorithm::Alerting { ack_ratio } => ack_ratio,
            _ => return Ok(()),
        };
        self.ack_countdown -= 1;
        if self.ack_countdown == 0 {
            self.ack_countdown = (1.0 / ack_ratio).floor() as u64;
            self.deliver(
                src,
                Message::Ack {
                    round,
                    timestamp: now_secs(),
                    msg_ts,
                    msg_rcv_ts,
                },
            )
            .await?;
        }
        Ok(())
    }

    /// Graceful-shutdown courtesy message: a closing
    /// non-leader tells its believed leader it is leaving. Best-effort
    /// regardless of variant — we are shutting down either way.
    async fn on_close(&self) {
        tracing::info!(round = self.round, "elector closing");
        let local_index = self.local_index();
        if self.leader != Some(local_index) {
            if let Some(l) = self.leader {
                if let Some(dest) = self.membership.address_at(l.get()) {
                    let _ = self
                        .deliver(
                            dest,
                            Message::Bye {
                                address: self.local,
                            },
                        )
                        .await;
                }
            }
        }
    }
}

/// Runs one elector's task 0 / task 1 / dispatcher as a single cooperative
/// loop until `close_notify` fires.
pub(super) async fn run_loop(mut inner: Inner, close_notify: Arc<Notify>) -> Result<()> {
    inner.start_round(0).await?;

    let mut heartbeat = tokio::time::interval(inner.d);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await; // first tick fires immediately; consume it

    loop {
        let sleep = tokio::time::sleep_until(inner.timer1_deadline);
        tokio::pin!(sleep);

        let transport = inner.transport.clone();
        let recv_fut = async move { transport.recv().await };

        tokio::select! {
            _ = close_notify.notified() => {
                inner.on_close().await;
                break;
            }
            _ = heartbeat.tick() => {
                inner.task0().await?;
            }
            _ = &mut sleep => {
                inner.task1().await?;
            }
            res = recv_fut => {
                match res {
                    Ok((src, msg)) => {
                        if let Err(e) = inner.handle_message(src, msg).await {
                            if inner.algorithm.is_lossy() {
                                tracing::warn!(error = %e, "handler error ignored on lossy link");
                            } else {
                                return Err(e);
                            }
                        }
                    }
                    Err(e) => {
                        if e.is_fatal_transport_error() && !inner.algorithm.is_lossy() {
                            return Err(e);
                        }
                        tracing::warn!(error = %e, "dropping malformed datagram");
                    }
                }
            }
        }
    }

    Ok(())
}
