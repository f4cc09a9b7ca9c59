//! Error taxonomy for the operation tracking pipeline.
//!
//! Errors are split by phase: [`InitiationError`] for the single call that
//! creates a remote operation, [`PollError`] for status-check cycles,
//! [`SessionError`] for local state-machine violations, and [`TrackerError`]
//! as the composition-level umbrella. Remote-reported business failures
//! (payment declined, compression crashed) are kept distinct from transport
//! failures so callers can render them differently.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;
use tokio::task::JoinError;

use crate::session::SessionStatus;
use crate::settlement::SettlementError;

/// The remote call that starts an operation failed. Never retried
/// automatically; the caller must re-initiate from scratch.
#[derive(Debug, Error, Diagnostic)]
pub enum InitiationError {
    /// Network-layer failure before any remote decision was made.
    #[error("initiation transport failure: {message}")]
    #[diagnostic(code(opwatch::initiate::transport))]
    Transport { message: String },

    /// The remote service rejected the request (4xx).
    #[error("initiation rejected ({status}): {message}")]
    #[diagnostic(
        code(opwatch::initiate::rejected),
        help("Check the request payload; rejected initiations are not retried.")
    )]
    Rejected { status: u16, message: String },

    /// The remote service itself failed (5xx).
    #[error("initiation upstream failure ({status}): {message}")]
    #[diagnostic(code(opwatch::initiate::upstream))]
    Upstream { status: u16, message: String },

    /// The response arrived but could not be decoded into the expected shape.
    #[error("malformed initiation response: {0}")]
    #[diagnostic(code(opwatch::initiate::malformed))]
    MalformedResponse(String),
}

/// A status-check cycle failed.
///
/// `Transport` and `MalformedResponse` are poll-cycle errors eligible for the
/// bounded retry budget; `RemoteFailure` and `Timeout` are always terminal.
#[derive(Debug, Error, Diagnostic)]
pub enum PollError {
    /// A single status request failed at the network layer.
    #[error("status poll transport failure: {message}")]
    #[diagnostic(
        code(opwatch::poll::transport),
        help("Transient transport failures are retried up to PollConfig::max_transport_retries.")
    )]
    Transport { message: String },

    /// The status response body could not be decoded; never silently ignored.
    #[error("malformed status response: {0}")]
    #[diagnostic(code(opwatch::poll::malformed))]
    MalformedResponse(String),

    /// The remote service reported that the operation itself failed.
    #[error("operation failed remotely: {message}")]
    #[diagnostic(code(opwatch::poll::remote_failure))]
    RemoteFailure { message: String },

    /// Polling exceeded the configured ceiling without a terminal status.
    #[error("operation timed out after {elapsed:?}")]
    #[diagnostic(
        code(opwatch::poll::timeout),
        help("Raise PollConfig::timeout if the backend is legitimately slow.")
    )]
    Timeout { elapsed: Duration },
}

/// Local state-machine violation. These indicate a driver bug, not a remote
/// condition, and are never converted into session failures.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum SessionError {
    #[error("illegal transition: {from} -> {to}")]
    #[diagnostic(
        code(opwatch::session::illegal_transition),
        help("Terminal states are absorbing; check the driver for a duplicated transition.")
    )]
    IllegalTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("progress reported outside Polling (status: {status})")]
    #[diagnostic(code(opwatch::session::progress_outside_polling))]
    ProgressOutsidePolling { status: SessionStatus },
}

/// Composition-level errors surfaced by [`OperationTracker`](crate::tracker::OperationTracker).
#[derive(Debug, Error, Diagnostic)]
pub enum TrackerError {
    #[error("session not found: {session_id}")]
    #[diagnostic(code(opwatch::tracker::session_not_found))]
    SessionNotFound { session_id: String },

    #[error("invalid session: missing session_id in return query")]
    #[diagnostic(
        code(opwatch::tracker::invalid_session),
        help("The checkout return URL must carry a session_id query parameter.")
    )]
    InvalidSession,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Initiation(#[from] InitiationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Settlement(#[from] SettlementError),

    #[error("tracking task join error: {0}")]
    #[diagnostic(code(opwatch::tracker::join))]
    Join(#[from] JoinError),
}
