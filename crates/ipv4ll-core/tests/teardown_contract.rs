//! Behavioral Contract Test: Teardown and Fatal Errors
//!
//! This test verifies that the context releases what it owns and surfaces
//! backend failures instead of swallowing them.
//!
//! Constraints verified:
//! - Dropping a context stops a live probe and releases the ACD engine
//! - The ACD engine is created once and reused across runs
//! - Unexpected backend failures surface as fatal errors
//! - A context that hit a fatal error can still be dropped safely
//!
//! If this test fails, long-running embedders leak ACD engines or keep
//! probing on interfaces they already gave up.

mod common;

use common::*;
use ipv4ll_core::traits::AcdError;
use ipv4ll_core::{Error, State};

#[test]
fn drop_with_live_probe_and_queued_events_releases_everything() {
    let (mut ipv4ll, handle) = scripted_context();

    ipv4ll.start(&minimal_config()).unwrap();
    ipv4ll.dispatch().unwrap();
    assert_eq!(ipv4ll.pending_events(), 1);
    assert_eq!(handle.live_engines(), 1);

    let stops_before = handle.stop_count();
    drop(ipv4ll);

    assert_eq!(handle.live_engines(), 0, "ACD engine must be released");
    assert_eq!(handle.stop_count(), stops_before + 1, "probe must be stopped");
    assert_eq!(handle.phase(), Phase::Init);
}

#[test]
fn drop_with_checked_out_event_releases_everything() {
    let (mut ipv4ll, handle) = scripted_context();

    ipv4ll.start(&minimal_config()).unwrap();
    ipv4ll.dispatch().unwrap();
    assert!(matches!(pop(&mut ipv4ll), Popped::Event(_)));

    drop(ipv4ll);
    assert_eq!(handle.live_engines(), 0);
}

#[test]
fn engine_is_reused_across_runs() {
    let (mut ipv4ll, handle) = scripted_context();

    for _ in 0..3 {
        ipv4ll.start(&minimal_config()).unwrap();
        ipv4ll.dispatch().unwrap();
        ipv4ll.stop();
        let _ = drain(&mut ipv4ll);
    }

    assert_eq!(handle.starts().len(), 3);
    assert_eq!(handle.live_engines(), 1);
}

#[test]
fn unexpected_dispatch_failure_is_not_recoverable() {
    let (mut ipv4ll, handle) = scripted_context();

    ipv4ll.start(&minimal_config()).unwrap();
    handle.fail_next_dispatch(AcdError::Unexpected("corrupt state".to_string()));

    let err = ipv4ll.dispatch().unwrap_err();
    assert!(matches!(err, Error::NotRecoverable(_)));
    assert!(err.is_fatal());

    drop(ipv4ll);
    assert_eq!(handle.live_engines(), 0);
}

#[test]
fn busy_from_dispatch_is_not_recoverable() {
    let (mut ipv4ll, handle) = scripted_context();

    handle.fail_next_dispatch(AcdError::Busy);
    assert!(matches!(
        ipv4ll.dispatch(),
        Err(Error::NotRecoverable(_))
    ));
}

#[test]
fn pop_failure_during_dispatch_is_surfaced() {
    let (mut ipv4ll, handle) = scripted_context();

    ipv4ll.start(&minimal_config()).unwrap();
    handle.fail_next_pop(AcdError::OutOfMemory);

    assert!(matches!(
        ipv4ll.dispatch(),
        Err(Error::ResourceExhausted(_))
    ));

    // Nothing was lost; the next dispatch proceeds normally
    ipv4ll.dispatch().unwrap();
    assert_eq!(ipv4ll.state(), State::Running);
}

#[test]
fn io_failure_during_dispatch_keeps_its_kind() {
    let (mut ipv4ll, handle) = scripted_context();

    handle.fail_next_dispatch(AcdError::Io(std::io::Error::from(
        std::io::ErrorKind::BrokenPipe,
    )));

    match ipv4ll.dispatch() {
        Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
        other => panic!("expected I/O error, got {:?}", other),
    }
}
