//! Operation sessions and their lifecycle state machine.
//!
//! An [`OperationSession`] tracks one remote asynchronous operation from
//! initiation to a terminal state. All mutation goes through transition
//! methods that enforce the lifecycle invariants:
//!
//! - terminal states ([`SessionStatus::is_terminal`]) are absorbing,
//! - `result` is populated iff the session succeeded, `error` iff it failed
//!   or timed out, never both,
//! - `progress` is only meaningful while polling and never decreases locally
//!   (remote regressions are clamped and logged).
//!
//! Callers outside the poller only ever see cloned snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{PollError, SessionError};

/// Which remote operation a session tracks. Determines the status endpoint
/// and the default polling cadence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    PaymentCheckout,
    ModelCompression,
    ModelVerification,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::PaymentCheckout => "payment_checkout",
            OperationKind::ModelCompression => "model_compression",
            OperationKind::ModelVerification => "model_verification",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session lifecycle status.
///
/// Transitions (enforced by [`OperationSession`]):
///
/// ```text
/// Created --> Polling --> Polling (self-loop)
/// Polling --> Succeeded | Failed | TimedOut
/// Created | Polling --> Cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl SessionStatus {
    /// True for states from which no further transition occurs.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Succeeded
                | SessionStatus::Failed
                | SessionStatus::TimedOut
                | SessionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Polling => "polling",
            SessionStatus::Succeeded => "succeeded",
            SessionStatus::Failed => "failed",
            SessionStatus::TimedOut => "timed_out",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad failure category carried on a failed or timed-out session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    Transport,
    MalformedResponse,
    Remote,
    Timeout,
    InvalidSession,
}

/// Structured failure stored on a session in `Failed` / `TimedOut`.
///
/// Deliberately detached from [`PollError`]: the session is a snapshot-able
/// value and must stay `Clone + Serialize`, while poll errors carry
/// diagnostics for the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub when: DateTime<Utc>,
    pub source: FailureSource,
    pub message: String,
}

impl SessionFailure {
    pub fn new(source: FailureSource, message: impl Into<String>) -> Self {
        Self {
            when: Utc::now(),
            source,
            message: message.into(),
        }
    }
}

impl From<&PollError> for SessionFailure {
    fn from(err: &PollError) -> Self {
        let source = match err {
            PollError::Transport { .. } => FailureSource::Transport,
            PollError::MalformedResponse(_) => FailureSource::MalformedResponse,
            PollError::RemoteFailure { .. } => FailureSource::Remote,
            PollError::Timeout { .. } => FailureSource::Timeout,
        };
        Self::new(source, err.to_string())
    }
}

/// One tracked remote operation.
///
/// Created by [`SessionInitiator`](crate::initiator::SessionInitiator) in
/// `Created`; mutated only by [`StatusPoller`](crate::poller::StatusPoller)
/// through the transition methods below. There is no persistence layer: a
/// dropped tracker loses in-flight tracking, and the payment flow compensates
/// by resuming from the `session_id` return-URL query parameter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationSession {
    id: String,
    kind: OperationKind,
    status: SessionStatus,
    progress: u8,
    result: Option<Value>,
    error: Option<SessionFailure>,
    created_at: DateTime<Utc>,
    last_polled_at: Option<DateTime<Utc>>,
}

impl OperationSession {
    /// New session in `Created`, holding the remote-issued identifier.
    pub fn new(id: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            id: id.into(),
            kind,
            status: SessionStatus::Created,
            progress: 0,
            result: None,
            error: None,
            created_at: Utc::now(),
            last_polled_at: None,
        }
    }

    /// Session born directly in `Failed` for a resume attempt that never
    /// reached the network (e.g. missing `session_id` on the return URL).
    ///
    /// This is a birth state, not a transition; `Created -> Failed` remains
    /// unreachable through the transition methods.
    pub fn invalid(kind: OperationKind, message: impl Into<String>) -> Self {
        let mut session = Self::new(String::new(), kind);
        session.status = SessionStatus::Failed;
        session.error = Some(SessionFailure::new(FailureSource::InvalidSession, message));
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Best-effort completion percentage; only meaningful while `Polling`.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Present iff `status == Succeeded`.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Present iff `status` is `Failed` or `TimedOut`.
    pub fn error(&self) -> Option<&SessionFailure> {
        self.error.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_polled_at(&self) -> Option<DateTime<Utc>> {
        self.last_polled_at
    }

    /// `Created -> Polling`, idempotent while already `Polling`.
    pub fn begin_polling(&mut self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Created | SessionStatus::Polling => {
                self.status = SessionStatus::Polling;
                Ok(())
            }
            from => Err(SessionError::IllegalTransition {
                from,
                to: SessionStatus::Polling,
            }),
        }
    }

    /// Record a remote progress report (self-loop on `Polling`).
    ///
    /// Remote progress is best-effort; regressions are clamped to the last
    /// observed value. Returns the progress actually applied.
    pub fn record_progress(&mut self, remote: u8) -> Result<u8, SessionError> {
        if self.status != SessionStatus::Polling {
            return Err(SessionError::ProgressOutsidePolling {
                status: self.status,
            });
        }
        let remote = remote.min(100);
        if remote < self.progress {
            tracing::warn!(
                session = %self.id,
                local = self.progress,
                remote,
                "remote progress regressed; clamping"
            );
        } else {
            self.progress = remote;
        }
        self.last_polled_at = Some(Utc::now());
        Ok(self.progress)
    }

    /// `Polling -> Succeeded`, populating the result payload.
    pub fn succeed(&mut self, payload: Value) -> Result<(), SessionError> {
        if self.status != SessionStatus::Polling {
            return Err(SessionError::IllegalTransition {
                from: self.status,
                to: SessionStatus::Succeeded,
            });
        }
        self.status = SessionStatus::Succeeded;
        self.result = Some(payload);
        self.last_polled_at = Some(Utc::now());
        Ok(())
    }

    /// `Polling -> Failed`, populating the structured error.
    pub fn fail(&mut self, failure: SessionFailure) -> Result<(), SessionError> {
        if self.status != SessionStatus::Polling {
            return Err(SessionError::IllegalTransition {
                from: self.status,
                to: SessionStatus::Failed,
            });
        }
        self.status = SessionStatus::Failed;
        self.error = Some(failure);
        Ok(())
    }

    /// `Polling -> TimedOut` once elapsed time exceeds the configured ceiling.
    pub fn time_out(&mut self, elapsed: std::time::Duration) -> Result<(), SessionError> {
        if self.status != SessionStatus::Polling {
            return Err(SessionError::IllegalTransition {
                from: self.status,
                to: SessionStatus::TimedOut,
            });
        }
        self.status = SessionStatus::TimedOut;
        self.error = Some(SessionFailure::new(
            FailureSource::Timeout,
            format!("no terminal status after {}s of polling", elapsed.as_secs()),
        ));
        Ok(())
    }

    /// `Created | Polling -> Cancelled`. Cancelling a terminal session is a
    /// driver bug and is rejected.
    pub fn cancel(&mut self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Created | SessionStatus::Polling => {
                self.status = SessionStatus::Cancelled;
                Ok(())
            }
            from => Err(SessionError::IllegalTransition {
                from,
                to: SessionStatus::Cancelled,
            }),
        }
    }
}
