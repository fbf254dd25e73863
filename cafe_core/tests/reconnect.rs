use cafe_core::{kinds, ConnectionState};
use serde_json::json;
use std::sync::atomic::Ordering;
use tokio::time::Duration;

mod common;
use common::{Harness, RECONNECT_DELAY};

fn assert_spaced_by_the_delay(h: &Harness) {
    let times = h.probe.connect_times();
    for pair in times.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= RECONNECT_DELAY, "attempts only {gap:?} apart");
        assert!(
            gap < RECONNECT_DELAY + Duration::from_millis(100),
            "attempt came late: {gap:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn every_close_schedules_exactly_one_reconnect() {
    const CLOSES: usize = 5;
    let (mut h, mut remote) = Harness::connected().await;

    for _ in 0..CLOSES {
        remote.close();
        remote = h.next_remote().await;
        assert!(h.manager.wait_until_connected().await);
    }

    assert_eq!(h.manager.connect_attempts(), CLOSES as u64 + 1);
    assert_eq!(h.probe.connects(), CLOSES + 1);
    assert_eq!(h.probe.disconnects(), CLOSES);
    assert_eq!(h.probe.max_open(), 1, "transports never overlap");
    assert_spaced_by_the_delay(&h);

    // Nothing else is pending while the last transport stays open.
    tokio::time::sleep(RECONNECT_DELAY * 3).await;
    assert_eq!(h.manager.connect_attempts(), CLOSES as u64 + 1);
    assert!(h.manager.is_connected());

    h.manager.shutdown().await;
    drop(remote);
}

#[tokio::test(start_paused = true)]
async fn refused_connects_are_retried_until_one_succeeds() {
    let mut h = Harness::new();
    h.probe.refuse_next.store(2, Ordering::SeqCst);

    h.manager.connect();
    let _refused_first = h.next_remote().await;
    let _refused_second = h.next_remote().await;
    let _remote = h.next_remote().await;
    assert!(h.manager.wait_until_connected().await);

    assert_eq!(h.manager.connect_attempts(), 3);
    assert_eq!(h.probe.max_open(), 1);
    assert_spaced_by_the_delay(&h);
}

#[tokio::test(start_paused = true)]
async fn state_reports_the_reconnect_cycle() {
    let (mut h, remote) = Harness::connected().await;
    let mut state = h.manager.watch_state();
    assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);

    remote.close();
    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();

    tokio::time::sleep(RECONNECT_DELAY - Duration::from_millis(10)).await;
    assert_eq!(h.manager.state(), ConnectionState::Disconnected, "still waiting");
    assert_eq!(h.manager.connect_attempts(), 1);

    let _remote = h.next_remote().await;
    assert!(h.manager.wait_until_connected().await);
    assert_eq!(h.manager.connect_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn read_error_takes_the_reconnect_path() {
    let (mut h, remote) = Harness::connected().await;

    remote.fail_read().await;
    let _next = h.next_remote().await;
    assert!(h.manager.wait_until_connected().await);

    assert_eq!(h.probe.disconnects(), 1, "the failed transport is closed once");
    assert_eq!(h.manager.connect_attempts(), 2);
    assert_spaced_by_the_delay(&h);

    tokio::time::sleep(RECONNECT_DELAY * 3).await;
    assert_eq!(h.manager.connect_attempts(), 2, "exactly one reconnect");
}

#[tokio::test(start_paused = true)]
async fn write_error_takes_the_reconnect_path() {
    let (mut h, remote) = Harness::connected().await;

    remote.fail_writes();
    h.manager.send(json!({}), kinds::GET_ORDERS).unwrap();
    let mut next = h.next_remote().await;
    assert!(h.manager.wait_until_connected().await);

    assert_eq!(h.probe.disconnects(), 1);
    assert_eq!(h.manager.connect_attempts(), 2);
    assert_spaced_by_the_delay(&h);

    // The failed frame is not replayed on the new transport.
    h.manager.send(json!({}), kinds::GET_PRODUCTS).unwrap();
    let frame = common::next_frame(&mut next).await;
    assert_eq!(frame["type"], "getProducts");

    tokio::time::sleep(RECONNECT_DELAY * 3).await;
    assert_eq!(h.manager.connect_attempts(), 2);
}

#[tokio::test]
async fn second_connect_call_is_ignored() {
    let mut h = Harness::new();
    h.manager.connect();
    h.manager.connect();
    let _remote = h.next_remote().await;
    assert!(h.manager.wait_until_connected().await);

    assert_eq!(h.manager.connect_attempts(), 1);
    assert_eq!(h.probe.connects(), 1);
}
