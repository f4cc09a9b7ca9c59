//! Tracker composition root.
//!
//! [`OperationTracker`] is the object the application owns: it wires the
//! backend, per-kind poll configuration, settlement ledger, and event bus
//! together, and holds the registry of live session cells so any view can
//! read current status through snapshots or the subscription stream —
//! constructor-injected state instead of ambient globals.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::backend::{InitiateRequest, OperationBackend};
use crate::config::TrackerConfig;
use crate::errors::TrackerError;
use crate::event_bus::{BusEmitter, EventBus, EventEmitter, EventSink, EventStream, OperationEvent};
use crate::initiator::{InitiatedOperation, SessionInitiator};
use crate::poller::{PollHandle, SharedSession, StatusPoller, TerminalHook};
use crate::session::{OperationKind, OperationSession, SessionStatus};
use crate::settlement::{SettlementLedger, SettlementOutcome, Wallet};

/// Outcome of resuming payment tracking from a checkout return URL.
pub enum PaymentResume {
    /// A `session_id` was present; polling is running.
    Tracking(PollHandle),
    /// No usable `session_id`; the session is `Failed` and no network call
    /// was made.
    Invalid(OperationSession),
}

/// Settles succeeded sessions through the ledger; other terminal states
/// pass through untouched.
struct SettleOnSuccess {
    ledger: Arc<SettlementLedger>,
    emitter: BusEmitter,
}

#[async_trait]
impl TerminalHook for SettleOnSuccess {
    async fn on_terminal(&self, session: &OperationSession) {
        if session.status() != SessionStatus::Succeeded {
            return;
        }
        let event = match self.ledger.settle(session).await {
            Ok(SettlementOutcome::Applied { balance, .. }) => OperationEvent::diagnostic(
                "settlement",
                format!("session {} settled; balance {balance}", session.id()),
            ),
            Ok(SettlementOutcome::AlreadyApplied { .. }) => OperationEvent::diagnostic(
                "settlement",
                format!("session {} already settled; skipped", session.id()),
            ),
            Err(e) => {
                tracing::warn!(session = %session.id(), error = %e, "settlement failed");
                OperationEvent::diagnostic(
                    "settlement",
                    format!("session {} settlement failed: {e}", session.id()),
                )
            }
        };
        let _ = self.emitter.emit(event);
    }
}

/// Owns the full tracking pipeline for one application.
pub struct OperationTracker {
    backend: Arc<dyn OperationBackend>,
    config: TrackerConfig,
    initiator: SessionInitiator,
    ledger: Arc<SettlementLedger>,
    event_bus: EventBus,
    sessions: RwLock<FxHashMap<String, SharedSession>>,
}

impl OperationTracker {
    /// Build a tracker and start its event bus listener.
    pub fn new(
        backend: Arc<dyn OperationBackend>,
        wallet: Arc<dyn Wallet>,
        config: TrackerConfig,
    ) -> Self {
        let event_bus = config.event_bus.build_event_bus();
        event_bus.listen_for_events();
        Self {
            initiator: SessionInitiator::new(Arc::clone(&backend)),
            ledger: Arc::new(SettlementLedger::new(wallet)),
            backend,
            config,
            event_bus,
            sessions: RwLock::new(FxHashMap::default()),
        }
    }

    /// Subscribe to progress/transition events.
    pub fn subscribe(&self) -> EventStream {
        self.event_bus.subscribe()
    }

    /// Register an additional event sink (e.g. a per-request channel).
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.event_bus.add_sink(sink);
    }

    /// The settlement ledger, for balance reads and applied-checks.
    pub fn ledger(&self) -> &SettlementLedger {
        &self.ledger
    }

    /// Start a remote operation and register its session. Does not poll.
    #[instrument(skip(self, request), fields(kind = %request.kind()), err)]
    pub async fn initiate(
        &self,
        request: &InitiateRequest,
    ) -> Result<InitiatedOperation, TrackerError> {
        let initiated = self.initiator.initiate(request).await?;
        self.register(initiated.session.clone());
        Ok(initiated)
    }

    /// Begin polling a registered session.
    pub fn track(&self, session_id: &str) -> Result<PollHandle, TrackerError> {
        let cell = self
            .sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| TrackerError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        Ok(self.track_cell(cell))
    }

    /// Initiate, poll to a terminal state, and return the final session.
    /// Intended for job kinds; checkout flows usually split initiation and
    /// tracking around the external redirect.
    #[instrument(skip(self, request), fields(kind = %request.kind()), err)]
    pub async fn run_to_terminal(
        &self,
        request: &InitiateRequest,
    ) -> Result<OperationSession, TrackerError> {
        let initiated = self.initiate(request).await?;
        let handle = self.track(initiated.session.id())?;
        handle.join().await
    }

    /// Resume payment tracking after the user returns from the hosted
    /// checkout page. A missing or empty `session_id` query parameter yields
    /// an immediately failed session and no network call.
    pub fn resume_payment(&self, query: &str) -> PaymentResume {
        let Some(session_id) = parse_session_id(query) else {
            tracing::warn!("payment resume without session_id");
            let session =
                OperationSession::invalid(OperationKind::PaymentCheckout, "invalid session");
            let _ = self.event_bus.get_emitter().emit(OperationEvent::transition(
                session.id(),
                session.kind(),
                SessionStatus::Created,
                SessionStatus::Failed,
                Some("invalid session".into()),
            ));
            return PaymentResume::Invalid(session);
        };
        let existing = self.sessions.read().get(&session_id).cloned();
        let cell = match existing {
            Some(cell) => cell,
            None => self.register(OperationSession::new(
                &session_id,
                OperationKind::PaymentCheckout,
            )),
        };
        PaymentResume::Tracking(self.track_cell(cell))
    }

    /// Snapshot of a registered session.
    pub fn session(&self, session_id: &str) -> Option<OperationSession> {
        self.sessions
            .read()
            .get(session_id)
            .map(|cell| cell.read().clone())
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Stop the event bus listener. Running polls finish independently.
    pub async fn shutdown(&self) {
        self.event_bus.stop_listener().await;
    }

    fn register(&self, session: OperationSession) -> SharedSession {
        let cell: SharedSession = Arc::new(RwLock::new(session));
        let id = cell.read().id().to_string();
        self.sessions.write().insert(id, Arc::clone(&cell));
        cell
    }

    fn track_cell(&self, cell: SharedSession) -> PollHandle {
        let kind = cell.read().kind();
        let emitter = self.event_bus.get_emitter();
        let hook = SettleOnSuccess {
            ledger: Arc::clone(&self.ledger),
            emitter: emitter.clone(),
        };
        StatusPoller::new(Arc::clone(&self.backend), self.config.poll_config(kind))
            .with_emitter(Arc::new(emitter))
            .with_terminal_hook(Arc::new(hook))
            .spawn_shared(cell)
    }
}

/// Extract a non-empty `session_id` from a return-URL query string, with or
/// without the leading `?`.
fn parse_session_id(query: &str) -> Option<String> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == "session_id" && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
