use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;

use opwatch::errors::{PollError, SessionError};
use opwatch::session::{
    FailureSource, OperationKind, OperationSession, SessionFailure, SessionStatus,
};

fn polling_session() -> OperationSession {
    let mut session = OperationSession::new("sess_1", OperationKind::ModelCompression);
    session.begin_polling().unwrap();
    session
}

#[test]
fn new_session_starts_created() {
    let session = OperationSession::new("sess_1", OperationKind::PaymentCheckout);
    assert_eq!(session.status(), SessionStatus::Created);
    assert_eq!(session.progress(), 0);
    assert!(session.result().is_none());
    assert!(session.error().is_none());
    assert!(session.last_polled_at().is_none());
}

#[test]
fn begin_polling_is_idempotent_while_polling() {
    let mut session = OperationSession::new("sess_1", OperationKind::ModelVerification);
    session.begin_polling().unwrap();
    assert_eq!(session.status(), SessionStatus::Polling);
    session.begin_polling().unwrap();
    assert_eq!(session.status(), SessionStatus::Polling);
}

#[test]
fn progress_outside_polling_is_rejected() {
    let mut session = OperationSession::new("sess_1", OperationKind::ModelCompression);
    assert_eq!(
        session.record_progress(10),
        Err(SessionError::ProgressOutsidePolling {
            status: SessionStatus::Created
        })
    );
    assert_eq!(session.progress(), 0);
}

#[test]
fn progress_regression_is_clamped() {
    let mut session = polling_session();
    assert_eq!(session.record_progress(75).unwrap(), 75);
    // Remote went backwards; local value holds.
    assert_eq!(session.record_progress(40).unwrap(), 75);
    assert_eq!(session.progress(), 75);
}

#[test]
fn progress_is_capped_at_100() {
    let mut session = polling_session();
    assert_eq!(session.record_progress(250).unwrap(), 100);
    assert_eq!(session.progress(), 100);
}

#[test]
fn progress_updates_last_polled_at() {
    let mut session = polling_session();
    session.record_progress(5).unwrap();
    assert!(session.last_polled_at().is_some());
}

#[test]
fn succeed_populates_result_and_only_result() {
    let mut session = polling_session();
    session.succeed(json!({"compression_ratio": 3.2})).unwrap();
    assert_eq!(session.status(), SessionStatus::Succeeded);
    assert_eq!(session.result(), Some(&json!({"compression_ratio": 3.2})));
    assert!(session.error().is_none());
}

#[test]
fn fail_populates_error_and_only_error() {
    let mut session = polling_session();
    session
        .fail(SessionFailure::new(
            FailureSource::Remote,
            "unsupported format",
        ))
        .unwrap();
    assert_eq!(session.status(), SessionStatus::Failed);
    assert!(session.result().is_none());
    let error = session.error().unwrap();
    assert_eq!(error.source, FailureSource::Remote);
    assert_eq!(error.message, "unsupported format");
}

#[test]
fn time_out_records_timeout_failure() {
    let mut session = polling_session();
    session.time_out(Duration::from_secs(300)).unwrap();
    assert_eq!(session.status(), SessionStatus::TimedOut);
    let error = session.error().unwrap();
    assert_eq!(error.source, FailureSource::Timeout);
    assert!(error.message.contains("300"));
}

#[test]
fn cancel_from_created_and_polling() {
    let mut created = OperationSession::new("sess_1", OperationKind::PaymentCheckout);
    created.cancel().unwrap();
    assert_eq!(created.status(), SessionStatus::Cancelled);

    let mut polling = polling_session();
    polling.cancel().unwrap();
    assert_eq!(polling.status(), SessionStatus::Cancelled);
    assert!(polling.error().is_none());
}

#[test]
fn terminal_states_are_absorbing() {
    let terminals: Vec<OperationSession> = vec![
        {
            let mut s = polling_session();
            s.succeed(json!({})).unwrap();
            s
        },
        {
            let mut s = polling_session();
            s.fail(SessionFailure::new(FailureSource::Remote, "boom"))
                .unwrap();
            s
        },
        {
            let mut s = polling_session();
            s.time_out(Duration::from_secs(1)).unwrap();
            s
        },
        {
            let mut s = polling_session();
            s.cancel().unwrap();
            s
        },
    ];

    for mut session in terminals {
        let status = session.status();
        assert!(status.is_terminal());
        assert!(session.begin_polling().is_err());
        assert!(session.record_progress(50).is_err());
        assert!(session.succeed(json!({})).is_err());
        assert!(
            session
                .fail(SessionFailure::new(FailureSource::Remote, "again"))
                .is_err()
        );
        assert!(session.time_out(Duration::from_secs(1)).is_err());
        assert!(session.cancel().is_err());
        assert_eq!(session.status(), status);
    }
}

#[test]
fn invalid_session_is_born_failed() {
    let session = OperationSession::invalid(OperationKind::PaymentCheckout, "invalid session");
    assert_eq!(session.status(), SessionStatus::Failed);
    assert!(session.result().is_none());
    let error = session.error().unwrap();
    assert_eq!(error.source, FailureSource::InvalidSession);
    assert_eq!(error.message, "invalid session");
}

#[test]
fn session_failure_maps_poll_error_sources() {
    let cases = [
        (
            PollError::Transport {
                message: "refused".into(),
            },
            FailureSource::Transport,
        ),
        (
            PollError::MalformedResponse("bad json".into()),
            FailureSource::MalformedResponse,
        ),
        (
            PollError::RemoteFailure {
                message: "declined".into(),
            },
            FailureSource::Remote,
        ),
        (
            PollError::Timeout {
                elapsed: Duration::from_secs(10),
            },
            FailureSource::Timeout,
        ),
    ];
    for (err, expected) in cases {
        let failure = SessionFailure::from(&err);
        assert_eq!(failure.source, expected);
        assert_eq!(failure.message, err.to_string());
    }
}

#[derive(Clone, Debug)]
enum Action {
    Begin,
    Progress(u8),
    Succeed,
    Fail,
    TimeOut,
    Cancel,
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Begin),
        any::<u8>().prop_map(Action::Progress),
        Just(Action::Succeed),
        Just(Action::Fail),
        Just(Action::TimeOut),
        Just(Action::Cancel),
    ]
}

proptest! {
    /// Any interleaving of transition attempts preserves the lifecycle
    /// invariants: terminal absorption, result/error exclusivity, and
    /// monotone bounded progress.
    #[test]
    fn lifecycle_invariants_hold(
        actions in proptest::collection::vec(action_strategy(), 0..32)
    ) {
        let mut session = OperationSession::new("sess_prop", OperationKind::ModelCompression);
        let mut last_progress = 0u8;

        for action in actions {
            let before = session.status();
            let was_terminal = before.is_terminal();
            let _ = match action {
                Action::Begin => session.begin_polling(),
                Action::Progress(p) => session.record_progress(p).map(|_| ()),
                Action::Succeed => session.succeed(json!({"ok": true})),
                Action::Fail => {
                    session.fail(SessionFailure::new(FailureSource::Remote, "remote failure"))
                }
                Action::TimeOut => session.time_out(Duration::from_secs(1)),
                Action::Cancel => session.cancel(),
            };

            if was_terminal {
                prop_assert_eq!(session.status(), before);
            }
            prop_assert!(session.progress() <= 100);
            prop_assert!(session.progress() >= last_progress);
            last_progress = session.progress();
            prop_assert_eq!(
                session.result().is_some(),
                session.status() == SessionStatus::Succeeded
            );
            prop_assert_eq!(
                session.error().is_some(),
                matches!(
                    session.status(),
                    SessionStatus::Failed | SessionStatus::TimedOut
                )
            );
        }
    }
}
