//! End-to-end election scenarios, run over the in-memory `ChannelSwitch`
//! transport so several electors can exchange messages in-process without
//! opening real sockets.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stable_elect::{
    Algorithm, ChannelSwitch, Elector, ElectorConfig, LeaderView, NullObserver, Observer, PeerAddress,
    ProcessIndex,
};

mod common;

fn addr(port: u16) -> PeerAddress {
    format!("127.0.0.1:{port}")
        .parse::<SocketAddr>()
        .unwrap()
        .into()
}

/// Records every notification it receives, in order.
#[derive(Default)]
struct RecordingObserver {
    views: Mutex<Vec<LeaderView>>,
}

impl Observer for RecordingObserver {
    fn notify(&self, view: LeaderView) {
        self.views.lock().unwrap().push(view);
    }
}

async fn converge<F: Fn() -> bool>(timeout: Duration, poll: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if poll() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Three peers A < B < C, stable variant, `d = 30ms`.
async fn spawn_stable_trio(switch: &ChannelSwitch) -> (Elector, Elector, Elector, [Arc<RecordingObserver>; 3]) {
    let a = addr(9100);
    let b = addr(9101);
    let c = addr(9102);

    let obs_a = Arc::new(RecordingObserver::default());
    let obs_b = Arc::new(RecordingObserver::default());
    let obs_c = Arc::new(RecordingObserver::default());

    let elector_a = Elector::spawn(
        Arc::new(switch.connect(a)),
        ElectorConfig {
            algorithm: Algorithm::Stable,
            peers: vec![b, c],
            timeout: Duration::from_millis(60),
            observer: obs_a.clone(),
        },
    )
    .await
    .unwrap();

    let elector_b = Elector::spawn(
        Arc::new(switch.connect(b)),
        ElectorConfig {
            algorithm: Algorithm::Stable,
            peers: vec![a, c],
            timeout: Duration::from_millis(60),
            observer: obs_b.clone(),
        },
    )
    .await
    .unwrap();

    let elector_c = Elector::spawn(
        Arc::new(switch.connect(c)),
        ElectorConfig {
            algorithm: Algorithm::Stable,
            peers: vec![a, b],
            timeout: Duration::from_millis(60),
            observer: obs_c.clone(),
        },
    )
    .await
    .unwrap();

    (elector_a, elector_b, elector_c, [obs_a, obs_b, obs_c])
}

#[tokio::test]
async fn scenario_1_quiet_network_confirms_leader_zero() {
    common::init_tracing();
    let switch = ChannelSwitch::new();
    let (a, b, c, [obs_a, obs_b, obs_c]) = spawn_stable_trio(&switch).await;

    let ok = converge(Duration::from_millis(500), || {
        a.leader() == Some(ProcessIndex::from(0)) && b.leader() == Some(ProcessIndex::from(0)) && c.leader() == Some(ProcessIndex::from(0))
    })
    .await;
    assert!(ok, "all three peers should confirm leader 0");

    assert_eq!(a.round(), 0);
    assert_eq!(b.round(), 0);
    assert_eq!(c.round(), 0);

    // Each observer is notified exactly once, with the none -> 0 transition.
    for obs in [&obs_a, &obs_b, &obs_c] {
        let views = obs.views.lock().unwrap();
        assert_eq!(views.len(), 1, "expected exactly one notification");
        assert_eq!(views[0].leader, Some(ProcessIndex::from(0)));
    }

    a.close().await;
    b.close().await;
    c.close().await;
}

#[tokio::test]
async fn scenario_2_leader_crash_elects_next_round() {
    common::init_tracing();
    let switch = ChannelSwitch::new();
    let (a, b, c, [_obs_a, obs_b, obs_c]) = spawn_stable_trio(&switch).await;

    assert!(
        converge(Duration::from_millis(500), || {
            a.leader() == Some(ProcessIndex::from(0)) && b.leader() == Some(ProcessIndex::from(0)) && c.leader() == Some(ProcessIndex::from(0))
        })
        .await
    );

    // Kill A: close it and remove it from the switch so further sends to it
    // are dropped, modeling a crash rather than a graceful shutdown.
    a.close().await;
    switch.disconnect(addr(9100));

    let ok = converge(Duration::from_millis(2000), || {
        b.round() == 1 && c.round() == 1 && b.leader() == Some(ProcessIndex::from(1)) && c.leader() == Some(ProcessIndex::from(1))
    })
    .await;
    assert!(ok, "B and C should elect B (index 1) as the new leader in round 1");

    // C's observer saw 0 -> none -> 1 (two notifications after the initial one).
    let views = obs_c.views.lock().unwrap();
    assert!(views.len() >= 2, "C should be notified at least twice across the crash");
    assert_eq!(views.last().unwrap().leader, Some(ProcessIndex::from(1)));

    let views_b = obs_b.views.lock().unwrap();
    assert_eq!(views_b.last().unwrap().leader, Some(ProcessIndex::from(1)));

    b.close().await;
    c.close().await;
}

#[tokio::test]
async fn scenario_6_hello_bye_propagation_reaches_all_peers() {
    common::init_tracing();
    let switch = ChannelSwitch::new();
    let a = addr(9200);
    let b = addr(9201);
    let c = addr(9202);
    let d = addr(9203);

    let elector_a = Elector::spawn(
        Arc::new(switch.connect(a)),
        ElectorConfig {
            algorithm: Algorithm::Stable,
            peers: vec![b, c],
            timeout: Duration::from_millis(60),
            observer: Arc::new(NullObserver),
        },
    )
    .await
    .unwrap();

    let elector_b = Elector::spawn(
        Arc::new(switch.connect(b)),
        ElectorConfig {
            algorithm: Algorithm::Stable,
            peers: vec![a, c],
            timeout: Duration::from_millis(60),
            observer: Arc::new(NullObserver),
        },
    )
    .await
    .unwrap();

    let elector_c = Elector::spawn(
        Arc::new(switch.connect(c)),
        ElectorConfig {
            algorithm: Algorithm::Stable,
            peers: vec![a, b],
            timeout: Duration::from_millis(60),
            observer: Arc::new(NullObserver),
        },
    )
    .await
    .unwrap();

    assert!(
        converge(Duration::from_millis(500), || {
            elector_a.leader() == Some(ProcessIndex::from(0)) && elector_b.leader() == Some(ProcessIndex::from(0)) && elector_c.leader() == Some(ProcessIndex::from(0))
        })
        .await
    );

    // D only knows about B and C, not the leader A; its Hello must be
    // forwarded to A, which adds D and reports it to everyone else.
    let elector_d = Elector::spawn(
        Arc::new(switch.connect(d)),
        ElectorConfig {
            algorithm: Algorithm::Stable,
            peers: vec![b, c],
            timeout: Duration::from_millis(60),
            observer: Arc::new(NullObserver),
        },
    )
    .await
    .unwrap();

    let ok = converge(Duration::from_millis(1000), || {
        elector_a.peers().contains(&d)
            && elector_b.peers().contains(&d)
            && elector_c.peers().contains(&d)
    })
    .await;
    assert!(ok, "D should propagate to every peer's membership table via A");

    elector_a.close().await;
    elector_b.close().await;
    elector_c.close().await;
    elector_d.close().await;
}

#[tokio::test]
async fn boundary_n_equals_1_is_always_its_own_leader() {
    common::init_tracing();
    let switch = ChannelSwitch::new();
    let a = addr(9300);
    let elector = Elector::spawn(
        Arc::new(switch.connect(a)),
        ElectorConfig {
            algorithm: Algorithm::Stable,
            peers: vec![],
            timeout: Duration::from_millis(40),
            observer: Arc::new(NullObserver),
        },
    )
    .await
    .unwrap();

    let ok = converge(Duration::from_millis(500), || elector.leader() == Some(ProcessIndex::from(0))).await;
    assert!(ok, "the sole process should confirm itself as leader");
    assert_eq!(elector.round(), 0, "task 1 should never fire when heartbeats are self-delivered");

    elector.close().await;
}

#[tokio::test]
async fn basic_variant_sets_leader_immediately_without_confirmation() {
    common::init_tracing();
    let switch = ChannelSwitch::new();
    let a = addr(9400);
    let b = addr(9401);

    let elector_a = Elector::spawn(
        Arc::new(switch.connect(a)),
        ElectorConfig {
            algorithm: Algorithm::Basic,
            peers: vec![b],
            timeout: Duration::from_millis(60),
            observer: Arc::new(NullObserver),
        },
    )
    .await
    .unwrap();

    // Basic variant: leader := round mod n the instant the round starts, no
    // two-Ok confirmation delay.
    assert_eq!(elector_a.leader(), Some(ProcessIndex::from(0)));

    elector_a.close().await;
}

#[tokio::test]
async fn expiring_links_variant_elects_leader_over_lossy_channel_switch() {
    common::init_tracing();
    let switch = ChannelSwitch::new();
    let a = addr(9500);
    let b = addr(9501);
    let c = addr(9502);

    let make = |local: PeerAddress, peers: Vec<PeerAddress>| {
        let switch = switch.clone();
        async move {
            Elector::spawn(
                Arc::new(switch.connect(local)),
                ElectorConfig {
                    algorithm: Algorithm::expiring_links(0.5).unwrap(),
                    peers,
                    timeout: Duration::from_millis(60),
                    observer: Arc::new(NullObserver),
                },
            )
            .await
            .unwrap()
        }
    };

    let elector_a = make(a, vec![b, c]).await;
    let elector_b = make(b, vec![a, c]).await;
    let elector_c = make(c, vec![a, b]).await;

    let ok = converge(Duration::from_millis(500), || {
        elector_a.leader() == Some(ProcessIndex::from(0)) && elector_b.leader() == Some(ProcessIndex::from(0)) && elector_c.leader() == Some(ProcessIndex::from(0))
    })
    .await;
    assert!(ok, "expiring-links variant should still converge with no real link loss");

    elector_a.close().await;
    elector_b.close().await;
    elector_c.close().await;
}

#[tokio::test]
async fn alerting_variant_elects_leader() {
    common::init_tracing();
    let switch = ChannelSwitch::new();
    let a = addr(9600);
    let b = addr(9601);
    let c = addr(9602);

    let make = |local: PeerAddress, peers: Vec<PeerAddress>| {
        let switch = switch.clone();
        async move {
            Elector::spawn(
                Arc::new(switch.connect(local)),
                ElectorConfig {
                    algorithm: Algorithm::alerting(0.5).unwrap(),
                    peers,
                    timeout: Duration::from_millis(60),
                    observer: Arc::new(NullObserver),
                },
            )
            .await
            .unwrap()
        }
    };

    let elector_a = make(a, vec![b, c]).await;
    let elector_b = make(b, vec![a, c]).await;
    let elector_c = make(c, vec![a, b]).await;

    let ok = converge(Duration::from_millis(500), || {
        elector_a.leader() == Some(ProcessIndex::from(0)) && elector_b.leader() == Some(ProcessIndex::from(0)) && elector_c.leader() == Some(ProcessIndex::from(0))
    })
    .await;
    assert!(ok, "O(1) alerting variant should converge with no real link loss");

    elector_a.close().await;
    elector_b.close().await;
    elector_c.close().await;
}

#[test]
fn invalid_ack_ratio_is_rejected_at_construction() {
    common::init_tracing();
    assert!(Algorithm::expiring_links(0.0).is_err());
    assert!(Algorithm::expiring_links(1.0).is_err());
    assert!(Algorithm::expiring_links(-0.2).is_err());
    assert!(Algorithm::alerting(1.5).is_err());
    assert!(Algorithm::expiring_links(0.5).is_ok());
}
