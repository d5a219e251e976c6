//! Integration tests for the session lifecycle
//!
//! These drive the controller through the public API with the scripted
//! backend and check ordering, integrity gating and teardown behaviour.

use teebox::integrity::compute_hash;
use teebox::observability::audit::LifecycleEventType;
use teebox::testing::ScriptedBackend;
use teebox::{Operation, Session, SessionState, TeeError};

fn scripted_session() -> Session {
    Session::with_backend(Box::new(ScriptedBackend::builtin()))
}

fn loaded(data: &[&[u8]]) -> Session {
    let mut session = scripted_session();
    session.create().unwrap();
    session
        .upload(
            b"sum.bin".to_vec(),
            data.iter().map(|d| d.to_vec()).collect(),
        )
        .unwrap();
    session
}

#[test]
fn test_sum_scenario() {
    let mut session = scripted_session();
    assert_eq!(session.state(), SessionState::Uninitialized);

    session.create().unwrap();
    session
        .upload(b"sum.bin".to_vec(), vec![b"1,2,3".to_vec()])
        .unwrap();
    session
        .verify(&compute_hash(b"sum.bin"), &[compute_hash(b"1,2,3")])
        .unwrap();
    let output = session.execute().unwrap();
    assert_eq!(output, b"6");
    assert_eq!(session.state(), SessionState::Executed);

    session.destroy().unwrap();
    assert_eq!(session.state(), SessionState::Destroyed);
    assert!(session.algorithm().is_empty());
    assert!(session.data().is_empty());
}

#[test]
fn test_wrong_algorithm_hash_blocks_execute() {
    let mut session = loaded(&[b"1,2,3"]);

    let err = session
        .verify(&compute_hash(b"evil.bin"), &[compute_hash(b"1,2,3")])
        .unwrap_err();
    match err {
        TeeError::IntegrityViolation {
            expected, computed, ..
        } => {
            assert_eq!(expected, compute_hash(b"evil.bin"));
            assert_eq!(computed, compute_hash(b"sum.bin"));
        }
        other => panic!("expected IntegrityViolation, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Loaded);

    let err = session.execute().unwrap_err();
    assert!(matches!(
        err,
        TeeError::InvalidState {
            operation: Operation::Execute,
            state: SessionState::Loaded
        }
    ));
    assert_eq!(session.state(), SessionState::Loaded);
}

#[test]
fn test_no_execute_without_verify() {
    let mut session = scripted_session();
    assert!(matches!(
        session.execute().unwrap_err(),
        TeeError::InvalidState { .. }
    ));
    session.create().unwrap();
    assert!(matches!(
        session.execute().unwrap_err(),
        TeeError::InvalidState { .. }
    ));
    session
        .upload(b"sum.bin".to_vec(), vec![b"1".to_vec()])
        .unwrap();
    assert!(matches!(
        session.execute().unwrap_err(),
        TeeError::InvalidState { .. }
    ));
    assert_eq!(session.audit().count(LifecycleEventType::Executed), 0);
}

#[test]
fn test_tampered_data_byte_fails_verify() {
    let mut session = loaded(&[b"1,2,3", b"4,5,6"]);
    let err = session
        .verify(
            &compute_hash(b"sum.bin"),
            &[compute_hash(b"1,2,3"), compute_hash(b"4,5,7")],
        )
        .unwrap_err();
    match err {
        TeeError::IntegrityViolation { payload, .. } => {
            assert_eq!(payload.to_string(), "data[1]");
        }
        other => panic!("expected IntegrityViolation, got {other:?}"),
    }
}

#[test]
fn test_hash_comparison_is_case_insensitive() {
    let mut session = loaded(&[b"7"]);
    session
        .verify(
            &compute_hash(b"sum.bin").to_uppercase(),
            &[compute_hash(b"7").to_uppercase()],
        )
        .unwrap();
    assert_eq!(session.execute().unwrap(), b"7");
}

#[test]
fn test_empty_expected_hash_never_passes() {
    let mut session = loaded(&[b"1"]);
    assert!(session.verify("", &[compute_hash(b"1")]).is_err());
    assert!(session.verify(&compute_hash(b"sum.bin"), &[""]).is_err());
    assert_eq!(session.state(), SessionState::Loaded);
}

#[test]
fn test_arity_mismatch() {
    let mut session = loaded(&[b"1", b"2", b"3"]);
    let err = session
        .verify(
            &compute_hash(b"sum.bin"),
            &[compute_hash(b"1"), compute_hash(b"2")],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        TeeError::ArityMismatch {
            expected: 3,
            actual: 2
        }
    ));
    assert_eq!(session.state(), SessionState::Loaded);
    assert_eq!(
        session
            .audit()
            .count(LifecycleEventType::VerificationRejected),
        1
    );
}

#[test]
fn test_reupload_after_verify_requires_reverify() {
    let mut session = loaded(&[b"1"]);
    session
        .verify(&compute_hash(b"sum.bin"), &[compute_hash(b"1")])
        .unwrap();

    session
        .upload(b"sum.bin".to_vec(), vec![b"100".to_vec()])
        .unwrap();
    assert_eq!(session.state(), SessionState::Loaded);
    assert!(matches!(
        session.execute().unwrap_err(),
        TeeError::InvalidState { .. }
    ));

    // Old digests no longer match the new payload
    assert!(session
        .verify(&compute_hash(b"sum.bin"), &[compute_hash(b"1")])
        .is_err());
    session
        .verify(&compute_hash(b"sum.bin"), &[compute_hash(b"100")])
        .unwrap();
    assert_eq!(session.execute().unwrap(), b"100");
}

#[test]
fn test_run_again_after_execute() {
    let mut session = loaded(&[b"1,1"]);
    session
        .verify(&compute_hash(b"sum.bin"), &[compute_hash(b"1,1")])
        .unwrap();
    assert_eq!(session.execute().unwrap(), b"2");
    assert!(session.execute().is_err());

    session
        .upload(b"sum.bin".to_vec(), vec![b"2,2".to_vec()])
        .unwrap();
    session
        .verify(&compute_hash(b"sum.bin"), &[compute_hash(b"2,2")])
        .unwrap();
    assert_eq!(session.execute().unwrap(), b"4");
}

#[test]
fn test_upload_replaces_payloads_that_failed_verify() {
    let mut session = loaded(&[b"1,2,x"]);
    assert!(session
        .verify(&compute_hash(b"sum.bin"), &[compute_hash(b"1,2,3")])
        .is_err());
    assert_eq!(session.state(), SessionState::Loaded);

    // Upload straight from Loaded, without a destroy/create round trip
    session
        .upload(b"sum.bin".to_vec(), vec![b"1,2,3".to_vec()])
        .unwrap();
    assert_eq!(session.state(), SessionState::Loaded);
    assert_eq!(session.data(), &[b"1,2,3".to_vec()]);
    session
        .verify(&compute_hash(b"sum.bin"), &[compute_hash(b"1,2,3")])
        .unwrap();
    assert_eq!(session.execute().unwrap(), b"6");
}

#[test]
fn test_invalid_upload_keeps_state() {
    let mut session = scripted_session();
    session.create().unwrap();
    assert!(matches!(
        session.upload(Vec::new(), vec![b"1".to_vec()]).unwrap_err(),
        TeeError::InvalidInput(_)
    ));
    assert!(matches!(
        session.upload(b"sum.bin".to_vec(), Vec::new()).unwrap_err(),
        TeeError::InvalidInput(_)
    ));
    assert_eq!(session.state(), SessionState::Created);
}

#[test]
fn test_upload_before_create_rejected() {
    let mut session = scripted_session();
    assert!(matches!(
        session
            .upload(b"sum.bin".to_vec(), vec![b"1".to_vec()])
            .unwrap_err(),
        TeeError::InvalidState {
            operation: Operation::Upload,
            state: SessionState::Uninitialized
        }
    ));
}

#[test]
fn test_transfer_error_drops_payloads() {
    let mut session =
        Session::with_backend(Box::new(ScriptedBackend::builtin().fail_upload("pipe closed")));
    session.create().unwrap();
    let err = session
        .upload(b"sum.bin".to_vec(), vec![b"1".to_vec()])
        .unwrap_err();
    assert!(matches!(err, TeeError::TransferError(_)));
    assert_eq!(session.state(), SessionState::Created);
    assert!(session.algorithm().is_empty());
    assert!(session.verify("x", &["y"]).is_err());
}

#[test]
fn test_create_failure_is_terminal() {
    let backend = ScriptedBackend::builtin().fail_create("runtime offline");
    let calls = backend.calls();
    let mut session = Session::with_backend(Box::new(backend));

    assert!(matches!(
        session.create().unwrap_err(),
        TeeError::BackendUnavailable(_)
    ));
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.create().is_err());
    assert!(session
        .upload(b"sum.bin".to_vec(), vec![b"1".to_vec()])
        .is_err());

    session.destroy().unwrap();
    assert_eq!(session.state(), SessionState::Destroyed);
    assert_eq!(calls.count(Operation::Destroy), 1);
}

#[test]
fn test_execution_fault_fails_session() {
    let mut session =
        Session::with_backend(Box::new(ScriptedBackend::builtin().fail_execute("segfault")));
    session.create().unwrap();
    session
        .upload(b"sum.bin".to_vec(), vec![b"1".to_vec()])
        .unwrap();
    session
        .verify(&compute_hash(b"sum.bin"), &[compute_hash(b"1")])
        .unwrap();

    assert!(matches!(
        session.execute().unwrap_err(),
        TeeError::ExecutionFault(_)
    ));
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session
        .upload(b"sum.bin".to_vec(), vec![b"1".to_vec()])
        .is_err());
    session.destroy().unwrap();
}

#[test]
fn test_destroy_is_idempotent() {
    let backend = ScriptedBackend::builtin();
    let calls = backend.calls();
    let mut session = Session::with_backend(Box::new(backend));
    session.create().unwrap();

    session.destroy().unwrap();
    let events = session.audit().events().len();
    session.destroy().unwrap();
    assert_eq!(session.state(), SessionState::Destroyed);
    assert_eq!(session.audit().events().len(), events);
    assert_eq!(calls.count(Operation::Destroy), 1);

    assert!(session.create().is_err());
}

#[test]
fn test_teardown_failure_retried() {
    let backend = ScriptedBackend::builtin().fail_destroy(1);
    let calls = backend.calls();
    let mut session = Session::with_backend(Box::new(backend));
    session.create().unwrap();
    session
        .upload(b"sum.bin".to_vec(), vec![b"1".to_vec()])
        .unwrap();

    assert!(matches!(
        session.destroy().unwrap_err(),
        TeeError::TeardownError(_)
    ));
    assert_eq!(session.state(), SessionState::Destroyed);
    assert!(session.teardown_pending());
    assert!(session.data().is_empty());
    assert!(session.execute().is_err());

    session.destroy().unwrap();
    assert!(!session.teardown_pending());
    assert_eq!(calls.count(Operation::Destroy), 2);
}

#[test]
fn test_drop_releases_backend() {
    let backend = ScriptedBackend::builtin();
    let calls = backend.calls();
    {
        let mut session = Session::with_backend(Box::new(backend));
        session.create().unwrap();
    }
    assert_eq!(calls.count(Operation::Destroy), 1);
}

#[test]
fn test_audit_trail_records_transitions() {
    let mut session = loaded(&[b"1,2,3"]);
    session
        .verify(&compute_hash(b"sum.bin"), &[compute_hash(b"1,2,3")])
        .unwrap();
    session.execute().unwrap();
    session.destroy().unwrap();

    let kinds: Vec<LifecycleEventType> = session
        .audit()
        .events()
        .iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            LifecycleEventType::Created,
            LifecycleEventType::Uploaded,
            LifecycleEventType::Verified,
            LifecycleEventType::Executed,
            LifecycleEventType::Destroyed,
        ]
    );
    for event in session.audit().events() {
        assert_eq!(event.session_id, session.id());
    }
    let last = session.audit().last().unwrap();
    assert_eq!(last.from, SessionState::Executed);
    assert_eq!(last.to, SessionState::Destroyed);
}
