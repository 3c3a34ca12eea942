//! One tick per campaign at a time; clock control never waits on a tick.

mod common;

use common::{migrated_store, test_service, Gate, ManualTime, TestRepository, CAMPAIGN};
use crossbeam_channel::{bounded, unbounded};
use marketsim_core::error::{ErrorCategory, SimError};
use std::{sync::Arc, thread, time::Duration};

#[test]
fn second_tick_is_rejected_while_first_is_in_flight() {
    let time = ManualTime::new(common::t0());
    let (entered_tx, entered_rx) = unbounded();
    let (release_tx, release_rx) = bounded(1);
    let repo = TestRepository::with_gate(migrated_store(), Gate { entered: entered_tx, release: release_rx });
    let service = Arc::new(test_service(repo, &time));

    let worker = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.run_manual_tick(CAMPAIGN))
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).expect("first tick reached commit");

    let err = service.run_manual_tick(CAMPAIGN).unwrap_err();
    assert!(matches!(err, SimError::TickInProgress(CAMPAIGN)));
    assert_eq!(err.category(), ErrorCategory::Concurrency);
    assert!(matches!(service.run_time_period(CAMPAIGN, "day"), Err(SimError::TickInProgress(_))));
    assert!(matches!(service.transfer_stock(CAMPAIGN, 10, 1, 5), Err(SimError::TickInProgress(_))));
    assert!(service.get_status(CAMPAIGN).unwrap().tick_in_progress);

    // Pausing does not wait for, or abort, the in-flight tick.
    let status = service.set_speed(CAMPAIGN, "pause").unwrap();
    assert_eq!(status.state, "paused");

    release_tx.send(()).unwrap();
    let report = worker.join().unwrap().unwrap();
    assert_eq!(report.tick, 1);

    let status = service.get_status(CAMPAIGN).unwrap();
    assert_eq!(status.current_tick, 1);
    assert_eq!(status.state, "paused");
    assert!(!status.tick_in_progress);
}

#[test]
fn campaigns_do_not_block_each_other() {
    let time = ManualTime::new(common::t0());
    let (entered_tx, entered_rx) = unbounded();
    let (release_tx, release_rx) = bounded(2);
    let repo = TestRepository::with_gate(migrated_store(), Gate { entered: entered_tx, release: release_rx });
    let service = Arc::new(test_service(repo, &time));

    let worker = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.run_manual_tick(CAMPAIGN))
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).expect("first tick reached commit");

    // Campaign 2 has no world, but its tick is not blocked by campaign 1's.
    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    let other = service.run_manual_tick(2).unwrap();
    assert_eq!(other.tick, 1);
    assert_eq!(other.shops_updated, 0);

    assert_eq!(worker.join().unwrap().unwrap().tick, 1);
}
