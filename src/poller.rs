//! Status polling: drives a session from `Created`/`Polling` to a terminal
//! state.
//!
//! One spawned task per session runs a strictly sequential tick loop — the
//! next status query is never issued while one is in flight, so no
//! out-of-order completion needs to be modeled. The loop layers on the
//! hardening the naive timer-callback version lacks:
//!
//! - a single cancellation path (explicit [`PollHandle::cancel`], handle
//!   drop, and the timeout ceiling all stop the loop the same way),
//! - bounded transport retries with capped, jittered exponential backoff,
//! - an overall timeout after which no further network calls are issued.
//!
//! Terminal-state side effects (settlement) run through a [`TerminalHook`]
//! inside the task, so correctness does not depend on any caller staying
//! around to observe the result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::oneshot;
use tokio::task;
use tokio::time::{self, Instant};

use crate::backend::{OperationBackend, RemoteStatus};
use crate::config::PollConfig;
use crate::errors::TrackerError;
use crate::event_bus::{EventEmitter, NullEmitter, OperationEvent};
use crate::session::{FailureSource, OperationSession, SessionFailure, SessionStatus};

/// Session cell shared between the driving task and observers.
pub type SharedSession = Arc<RwLock<OperationSession>>;

/// Invoked exactly once when a session reaches a terminal state, from inside
/// the polling task. The hook receives every terminal status and decides
/// what, if anything, to apply.
#[async_trait]
pub trait TerminalHook: Send + Sync {
    async fn on_terminal(&self, session: &OperationSession);
}

/// Handle to a running polling task.
///
/// Dropping the handle cancels the run: a torn-down view must not leak a
/// timer polling a session nobody observes.
#[derive(Debug)]
pub struct PollHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: Option<task::JoinHandle<()>>,
    cell: SharedSession,
}

impl PollHandle {
    /// Request cancellation. Idempotent; a no-op once the session is
    /// terminal.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Clone of the current session state.
    pub fn snapshot(&self) -> OperationSession {
        self.cell.read().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(task::JoinHandle::is_finished)
    }

    /// Wait for the polling task and return the terminal session.
    pub async fn join(mut self) -> Result<OperationSession, TrackerError> {
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(self.cell.read().clone())
    }

    /// Cancel, then wait for the task to acknowledge and return the
    /// (now `Cancelled`) session.
    pub async fn cancel_and_join(mut self) -> Result<OperationSession, TrackerError> {
        self.cancel();
        self.join().await
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Drives sessions to a terminal state by repeated status queries.
pub struct StatusPoller {
    backend: Arc<dyn OperationBackend>,
    config: PollConfig,
    emitter: Arc<dyn EventEmitter>,
    terminal_hook: Option<Arc<dyn TerminalHook>>,
}

impl StatusPoller {
    pub fn new(backend: Arc<dyn OperationBackend>, config: PollConfig) -> Self {
        Self {
            backend,
            config,
            emitter: Arc::new(NullEmitter),
            terminal_hook: None,
        }
    }

    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    #[must_use]
    pub fn with_terminal_hook(mut self, hook: Arc<dyn TerminalHook>) -> Self {
        self.terminal_hook = Some(hook);
        self
    }

    /// Spawn the polling task for an owned session.
    pub fn spawn(&self, session: OperationSession) -> PollHandle {
        self.spawn_shared(Arc::new(RwLock::new(session)))
    }

    /// Spawn the polling task over an externally shared session cell.
    pub fn spawn_shared(&self, cell: SharedSession) -> PollHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let driver = Driver {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            emitter: Arc::clone(&self.emitter),
            terminal_hook: self.terminal_hook.clone(),
            cell: Arc::clone(&cell),
        };
        let task = task::spawn(driver.run(cancel_rx));
        PollHandle {
            cancel: Some(cancel_tx),
            task: Some(task),
            cell,
        }
    }

    /// Convenience: spawn and wait for the terminal session.
    pub async fn poll_to_terminal(
        &self,
        session: OperationSession,
    ) -> Result<OperationSession, TrackerError> {
        self.spawn(session).join().await
    }
}

struct Driver {
    backend: Arc<dyn OperationBackend>,
    config: PollConfig,
    emitter: Arc<dyn EventEmitter>,
    terminal_hook: Option<Arc<dyn TerminalHook>>,
    cell: SharedSession,
}

impl Driver {
    async fn run(self, mut cancel_rx: oneshot::Receiver<()>) {
        let (session_id, kind) = {
            let session = self.cell.read();
            if session.status().is_terminal() {
                return;
            }
            (session.id().to_string(), session.kind())
        };

        let started = Instant::now();
        let mut poll_count: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            let delay = if poll_count == 0 && self.config.poll_immediately {
                Duration::ZERO
            } else if consecutive_failures > 0 {
                self.jittered_backoff(consecutive_failures)
            } else {
                self.config.interval
            };
            // Cap the wait so the timeout ceiling fires promptly even with
            // long intervals.
            let remaining = self.config.timeout.saturating_sub(started.elapsed());
            let wait = delay.min(remaining);

            if !wait.is_zero() {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        self.finish_cancelled(&session_id, kind).await;
                        return;
                    }
                    _ = time::sleep(wait) => {}
                }
            }

            if started.elapsed() >= self.config.timeout {
                self.finish_timed_out(started.elapsed(), &session_id, kind)
                    .await;
                return;
            }

            if poll_count == 0 && consecutive_failures == 0 {
                self.begin_polling(&session_id, kind);
            }

            tracing::debug!(session = %session_id, %kind, poll_count, "dispatching status query");
            let report = tokio::select! {
                _ = &mut cancel_rx => {
                    self.finish_cancelled(&session_id, kind).await;
                    return;
                }
                report = self.backend.poll(kind, &session_id) => report,
            };
            poll_count += 1;

            match report {
                Ok(report) => {
                    consecutive_failures = 0;
                    match report.status {
                        RemoteStatus::Processing { progress } => {
                            let applied = {
                                let mut session = self.cell.write();
                                let remote = progress.unwrap_or_else(|| session.progress());
                                session.record_progress(remote)
                            };
                            match applied {
                                Ok(progress) => self.emit(OperationEvent::progress(
                                    &session_id,
                                    kind,
                                    progress,
                                    poll_count,
                                )),
                                Err(e) => {
                                    tracing::error!(session = %session_id, error = %e, "progress rejected");
                                    return;
                                }
                            }
                        }
                        RemoteStatus::Completed { payload } => {
                            self.finish_succeeded(payload, &session_id, kind).await;
                            return;
                        }
                        RemoteStatus::Failed { message } => {
                            let message = message
                                .unwrap_or_else(|| "operation failed without detail".to_string());
                            self.finish_failed(
                                SessionFailure::new(FailureSource::Remote, &message),
                                Some(message),
                                &session_id,
                                kind,
                            )
                            .await;
                            return;
                        }
                    }
                }
                Err(err) => {
                    consecutive_failures += 1;
                    if consecutive_failures > self.config.max_transport_retries {
                        tracing::warn!(
                            session = %session_id,
                            retries = self.config.max_transport_retries,
                            error = %err,
                            "retry budget exhausted"
                        );
                        let message = err.to_string();
                        self.finish_failed(
                            SessionFailure::from(&err),
                            Some(message),
                            &session_id,
                            kind,
                        )
                        .await;
                        return;
                    }
                    tracing::warn!(
                        session = %session_id,
                        attempt = consecutive_failures,
                        error = %err,
                        "poll cycle failed; backing off"
                    );
                    self.emit(OperationEvent::diagnostic(
                        "poll_retry",
                        format!(
                            "session {session_id}: poll attempt {consecutive_failures} failed: {err}"
                        ),
                    ));
                }
            }
        }
    }

    fn begin_polling(&self, session_id: &str, kind: crate::session::OperationKind) {
        let transitioned = {
            let mut session = self.cell.write();
            let from = session.status();
            session.begin_polling().map(|()| from)
        };
        match transitioned {
            Ok(SessionStatus::Created) => self.emit(OperationEvent::transition(
                session_id,
                kind,
                SessionStatus::Created,
                SessionStatus::Polling,
                None,
            )),
            Ok(_) => {}
            Err(e) => tracing::error!(session = %session_id, error = %e, "begin_polling rejected"),
        }
    }

    async fn finish_succeeded(
        &self,
        payload: serde_json::Value,
        session_id: &str,
        kind: crate::session::OperationKind,
    ) {
        let outcome = self.cell.write().succeed(payload);
        if let Err(e) = outcome {
            tracing::error!(session = %session_id, error = %e, "success transition rejected");
            return;
        }
        self.emit(OperationEvent::transition(
            session_id,
            kind,
            SessionStatus::Polling,
            SessionStatus::Succeeded,
            None,
        ));
        self.run_terminal_hook().await;
    }

    async fn finish_failed(
        &self,
        failure: SessionFailure,
        message: Option<String>,
        session_id: &str,
        kind: crate::session::OperationKind,
    ) {
        let outcome = self.cell.write().fail(failure);
        if let Err(e) = outcome {
            tracing::error!(session = %session_id, error = %e, "failure transition rejected");
            return;
        }
        self.emit(OperationEvent::transition(
            session_id,
            kind,
            SessionStatus::Polling,
            SessionStatus::Failed,
            message,
        ));
        self.run_terminal_hook().await;
    }

    async fn finish_timed_out(
        &self,
        elapsed: Duration,
        session_id: &str,
        kind: crate::session::OperationKind,
    ) {
        let outcome = {
            let mut session = self.cell.write();
            // A ceiling shorter than the first delay can fire from Created.
            if session.status() == SessionStatus::Created {
                let _ = session.begin_polling();
            }
            session.time_out(elapsed)
        };
        if let Err(e) = outcome {
            tracing::error!(session = %session_id, error = %e, "timeout transition rejected");
            return;
        }
        tracing::warn!(session = %session_id, ?elapsed, "polling ceiling exceeded");
        self.emit(OperationEvent::transition(
            session_id,
            kind,
            SessionStatus::Polling,
            SessionStatus::TimedOut,
            Some(format!("timed out after {}s", elapsed.as_secs())),
        ));
        self.run_terminal_hook().await;
    }

    async fn finish_cancelled(&self, session_id: &str, kind: crate::session::OperationKind) {
        let (from, outcome) = {
            let mut session = self.cell.write();
            (session.status(), session.cancel())
        };
        if outcome.is_err() {
            // Already terminal; nothing to do.
            return;
        }
        tracing::debug!(session = %session_id, "polling cancelled");
        self.emit(OperationEvent::transition(
            session_id,
            kind,
            from,
            SessionStatus::Cancelled,
            None,
        ));
        self.run_terminal_hook().await;
    }

    async fn run_terminal_hook(&self) {
        if let Some(hook) = &self.terminal_hook {
            let snapshot = self.cell.read().clone();
            hook.on_terminal(&snapshot).await;
        }
    }

    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_delay(attempt);
        let jitter_cap = (base.as_millis() as u64 / 4).max(1);
        let jitter = rand::rng().random_range(0..jitter_cap);
        base + Duration::from_millis(jitter)
    }

    fn emit(&self, event: OperationEvent) {
        if let Err(e) = self.emitter.emit(event) {
            tracing::debug!(error = %e, "event emission failed");
        }
    }
}
