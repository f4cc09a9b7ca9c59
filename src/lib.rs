//! # Opwatch: Asynchronous External-Operation Tracking
//!
//! Opwatch tracks remote asynchronous operations — hosted checkout sessions
//! and long-running model compression/verification jobs — through a single
//! initiate-then-poll pattern, hardened with cancellation, timeouts, bounded
//! retries, and idempotent settlement of success side effects.
//!
//! ## Core Concepts
//!
//! - **Sessions**: One [`session::OperationSession`] per remote operation,
//!   with an enforced lifecycle state machine (terminal states are
//!   absorbing; result and error are mutually exclusive).
//! - **Backend**: The [`backend::OperationBackend`] trait is the one
//!   pluggable seam — a real HTTP client in production, scripted fakes in
//!   tests.
//! - **Initiator**: [`initiator::SessionInitiator`] makes exactly one call
//!   to create the remote operation; it never polls.
//! - **Poller**: [`poller::StatusPoller`] drives a session to a terminal
//!   state on a fixed cadence, one in-flight status query at a time.
//! - **Settlement**: [`settlement::SettlementLedger`] applies success side
//!   effects (wallet credits, feature unlocks) exactly once per session id.
//! - **Events**: the [`event_bus`] fans progress and transition events out
//!   to sinks and subscribers, so views observe instead of owning state.
//!
//! ## Quick Start
//!
//! ### Session lifecycle
//!
//! ```
//! use opwatch::session::{OperationKind, OperationSession, SessionStatus};
//!
//! let mut session = OperationSession::new("job_1", OperationKind::ModelCompression);
//! assert_eq!(session.status(), SessionStatus::Created);
//!
//! session.begin_polling().unwrap();
//! session.record_progress(40).unwrap();
//! session.succeed(serde_json::json!({"compression_ratio": 3.2})).unwrap();
//!
//! assert_eq!(session.status(), SessionStatus::Succeeded);
//! assert!(session.result().is_some());
//! assert!(session.error().is_none());
//!
//! // Terminal states are absorbing.
//! assert!(session.cancel().is_err());
//! ```
//!
//! ### Tracking a compression job
//!
//! ```no_run
//! use std::sync::Arc;
//! use opwatch::backend::InitiateRequest;
//! use opwatch::config::TrackerConfig;
//! use opwatch::http::HttpBackend;
//! use opwatch::settlement::InMemoryWallet;
//! use opwatch::tracker::OperationTracker;
//!
//! # async fn example() -> Result<(), opwatch::errors::TrackerError> {
//! let backend = Arc::new(HttpBackend::from_env());
//! let wallet = Arc::new(InMemoryWallet::new(0));
//! let tracker = OperationTracker::new(backend, wallet, TrackerConfig::from_env());
//!
//! let request = InitiateRequest::Compression {
//!     model_file: "model.onnx".into(),
//!     compression_level: 3,
//!     techniques: vec!["quantization".into()],
//! };
//! let terminal = tracker.run_to_terminal(&request).await?;
//! println!("finished: {} ({:?})", terminal.status(), terminal.result());
//! # Ok(())
//! # }
//! ```
//!
//! ### Payment checkout with redirect
//!
//! Checkout splits around the external redirect: initiate, navigate to the
//! hosted page, then resume tracking from the return URL.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use opwatch::backend::InitiateRequest;
//! # use opwatch::config::TrackerConfig;
//! # use opwatch::http::HttpBackend;
//! # use opwatch::settlement::InMemoryWallet;
//! use opwatch::tracker::{OperationTracker, PaymentResume};
//!
//! # async fn example(tracker: OperationTracker) -> Result<(), opwatch::errors::TrackerError> {
//! let initiated = tracker.initiate(&InitiateRequest::founder_checkout()).await?;
//! if let Some(url) = &initiated.redirect_url {
//!     // Hand off to the hosted checkout page; this ends the current page
//!     // lifecycle. Tracking resumes on return.
//!     println!("redirect to {url}");
//! }
//!
//! // ...later, back from checkout with the return-URL query string:
//! match tracker.resume_payment("session_id=sess_123") {
//!     PaymentResume::Tracking(handle) => {
//!         let terminal = handle.join().await?;
//!         println!("payment {}", terminal.status());
//!     }
//!     PaymentResume::Invalid(session) => {
//!         eprintln!("{}", session.error().unwrap().message);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Errors are phase-scoped ([`errors::InitiationError`], [`errors::PollError`],
//! [`errors::SessionError`], [`errors::TrackerError`]) and carry miette
//! diagnostics. Remote business failures stay distinct from transport
//! failures; only the latter consume the retry budget.
//!
//! ## Module Guide
//!
//! - [`session`] - Session state machine and failure records
//! - [`backend`] - Backend capability trait and wire types
//! - [`initiator`] - Operation initiation
//! - [`poller`] - Polling loop, cancellation, timeout, retries
//! - [`settlement`] - Idempotency ledger and wallet seam
//! - [`tracker`] - Composition root and payment resume flow
//! - [`event_bus`] - Progress/transition fan-out to sinks and subscribers
//! - [`config`] - Poll cadence and tracker configuration
//! - [`telemetry`] - Tracing setup and sink formatting

pub mod backend;
pub mod config;
pub mod errors;
pub mod event_bus;
#[cfg(feature = "http")]
pub mod http;
pub mod initiator;
pub mod poller;
pub mod session;
pub mod settlement;
pub mod telemetry;
pub mod tracker;
