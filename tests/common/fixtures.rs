#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use opwatch::backend::{InitiateReceipt, InitiateRequest, OperationBackend};
use opwatch::config::{EventBusConfig, PollConfig, TrackerConfig};
use opwatch::event_bus::{EmitterError, EventEmitter, OperationEvent};
use opwatch::poller::TerminalHook;
use opwatch::session::{OperationKind, OperationSession};
use opwatch::settlement::InMemoryWallet;
use opwatch::tracker::OperationTracker;

/// Millisecond-scale cadence so tests finish fast under virtual or real time.
pub fn fast_poll_config() -> PollConfig {
    PollConfig::default()
        .with_interval(Duration::from_millis(10))
        .with_poll_immediately(true)
        .with_timeout(Duration::from_secs(5))
        .with_backoff(Duration::from_millis(5), Duration::from_millis(40))
}

pub fn compression_request() -> InitiateRequest {
    InitiateRequest::Compression {
        model_file: "model.onnx".into(),
        compression_level: 3,
        techniques: vec!["quantization".into(), "pruning".into()],
    }
}

pub fn job_receipt(id: &str) -> InitiateReceipt {
    InitiateReceipt::new(id)
}

pub fn checkout_receipt(id: &str) -> InitiateReceipt {
    InitiateReceipt::new(id).with_redirect("https://checkout.example/pay/1")
}

/// Tracker config with fast cadence for every kind and no stdout sink noise.
pub fn fast_tracker_config() -> TrackerConfig {
    let fast = fast_poll_config();
    TrackerConfig::default()
        .with_poll_config(OperationKind::PaymentCheckout, fast.clone())
        .with_poll_config(OperationKind::ModelCompression, fast.clone())
        .with_poll_config(OperationKind::ModelVerification, fast)
        .with_event_bus(EventBusConfig::new(64, vec![]))
}

pub fn tracker_with(
    backend: Arc<dyn OperationBackend>,
    wallet: Arc<InMemoryWallet>,
) -> OperationTracker {
    OperationTracker::new(backend, wallet, fast_tracker_config())
}

/// Emitter that stores every event for later assertions.
#[derive(Clone, Debug, Default)]
pub struct CaptureEmitter {
    events: Arc<Mutex<Vec<OperationEvent>>>,
}

impl CaptureEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<OperationEvent> {
        self.events.lock().clone()
    }

    /// Progress percentages in emission order.
    pub fn progress_values(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                OperationEvent::Progress(e) => Some(e.progress),
                _ => None,
            })
            .collect()
    }
}

impl EventEmitter for CaptureEmitter {
    fn emit(&self, event: OperationEvent) -> Result<(), EmitterError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Terminal hook that records every session it is handed.
#[derive(Clone, Default)]
pub struct RecordingHook {
    seen: Arc<Mutex<Vec<OperationSession>>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<OperationSession> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl TerminalHook for RecordingHook {
    async fn on_terminal(&self, session: &OperationSession) {
        self.seen.lock().push(session.clone());
    }
}
