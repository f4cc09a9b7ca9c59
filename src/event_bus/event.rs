use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{OperationKind, SessionStatus};

/// Event published by the tracking pipeline.
///
/// `Progress` fires on every successful status poll (it drives progress
/// bars); `Transition` fires on every session status change; `Diagnostic`
/// carries free-form operational messages (retries, settlement results).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum OperationEvent {
    Progress(ProgressEvent),
    Transition(TransitionEvent),
    Diagnostic(DiagnosticEvent),
}

impl OperationEvent {
    pub fn progress(
        session_id: impl Into<String>,
        kind: OperationKind,
        progress: u8,
        poll_count: u64,
    ) -> Self {
        OperationEvent::Progress(ProgressEvent {
            session_id: session_id.into(),
            kind,
            progress,
            poll_count,
            at: Utc::now(),
        })
    }

    pub fn transition(
        session_id: impl Into<String>,
        kind: OperationKind,
        from: SessionStatus,
        to: SessionStatus,
        message: Option<String>,
    ) -> Self {
        OperationEvent::Transition(TransitionEvent {
            session_id: session_id.into(),
            kind,
            from,
            to,
            message,
            at: Utc::now(),
        })
    }

    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        OperationEvent::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
        })
    }

    /// Session this event belongs to, when any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            OperationEvent::Progress(e) => Some(&e.session_id),
            OperationEvent::Transition(e) => Some(&e.session_id),
            OperationEvent::Diagnostic(_) => None,
        }
    }

    /// True when this event reports arrival in a terminal status.
    pub fn is_terminal_transition(&self) -> bool {
        matches!(self, OperationEvent::Transition(e) if e.to.is_terminal())
    }

    /// Structured JSON form with a normalized schema, for channel consumers
    /// (SSE, dashboards) that should not depend on Rust types.
    pub fn to_json_value(&self) -> Value {
        use serde_json::json;
        match self {
            OperationEvent::Progress(e) => json!({
                "type": "progress",
                "session_id": e.session_id,
                "kind": e.kind.as_str(),
                "progress": e.progress,
                "poll_count": e.poll_count,
                "timestamp": e.at.to_rfc3339(),
            }),
            OperationEvent::Transition(e) => json!({
                "type": "transition",
                "session_id": e.session_id,
                "kind": e.kind.as_str(),
                "from": e.from.as_str(),
                "to": e.to.as_str(),
                "message": e.message,
                "timestamp": e.at.to_rfc3339(),
            }),
            OperationEvent::Diagnostic(e) => json!({
                "type": "diagnostic",
                "scope": e.scope,
                "message": e.message,
            }),
        }
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }
}

impl fmt::Display for OperationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationEvent::Progress(e) => {
                write!(f, "[{}@{}] progress {}%", e.session_id, e.kind, e.progress)
            }
            OperationEvent::Transition(e) => match &e.message {
                Some(msg) => write!(
                    f,
                    "[{}@{}] {} -> {}: {msg}",
                    e.session_id, e.kind, e.from, e.to
                ),
                None => write!(f, "[{}@{}] {} -> {}", e.session_id, e.kind, e.from, e.to),
            },
            OperationEvent::Diagnostic(e) => write!(f, "[{}] {}", e.scope, e.message),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub session_id: String,
    pub kind: OperationKind,
    pub progress: u8,
    /// How many status queries have completed for this session so far.
    pub poll_count: u64,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransitionEvent {
    pub session_id: String,
    pub kind: OperationKind,
    pub from: SessionStatus,
    pub to: SessionStatus,
    /// Human-readable detail for failure transitions, when the backend
    /// supplied one.
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub scope: String,
    pub message: String,
}
