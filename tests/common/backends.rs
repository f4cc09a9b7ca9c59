#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use opwatch::backend::{
    InitiateReceipt, InitiateRequest, OperationBackend, StatusReport,
};
use opwatch::errors::{InitiationError, PollError};
use opwatch::session::OperationKind;

/// One scripted poll response.
#[derive(Clone, Debug)]
pub enum PollScript {
    Processing(Option<u8>),
    Completed(Value),
    RemoteFailed(&'static str),
    Transport,
    Malformed,
}

impl PollScript {
    fn into_result(self) -> Result<StatusReport, PollError> {
        match self {
            PollScript::Processing(progress) => Ok(StatusReport::processing(progress)),
            PollScript::Completed(payload) => Ok(StatusReport::completed(payload)),
            PollScript::RemoteFailed(message) => {
                Ok(StatusReport::failed(Some(message.to_string())))
            }
            PollScript::Transport => Err(PollError::Transport {
                message: "connection refused".into(),
            }),
            PollScript::Malformed => Err(PollError::MalformedResponse(
                "unexpected end of input".into(),
            )),
        }
    }
}

/// In-memory backend with a scripted poll sequence and call-count spies.
pub struct ScriptedBackend {
    receipt: InitiateReceipt,
    script: Mutex<VecDeque<PollScript>>,
    fallback: Option<PollScript>,
    initiate_error: Mutex<Option<InitiationError>>,
    initiate_calls: AtomicUsize,
    poll_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(receipt: InitiateReceipt, script: Vec<PollScript>) -> Arc<Self> {
        Arc::new(Self {
            receipt,
            script: Mutex::new(script.into()),
            fallback: None,
            initiate_error: Mutex::new(None),
            initiate_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        })
    }

    /// Backend that never reaches a terminal status.
    pub fn always_processing(receipt: InitiateReceipt, progress: Option<u8>) -> Arc<Self> {
        Arc::new(Self {
            receipt,
            script: Mutex::new(VecDeque::new()),
            fallback: Some(PollScript::Processing(progress)),
            initiate_error: Mutex::new(None),
            initiate_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        })
    }

    /// Backend whose next initiate call fails with the given error.
    pub fn failing_initiate(error: InitiationError) -> Arc<Self> {
        Arc::new(Self {
            receipt: InitiateReceipt::new("unused"),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            initiate_error: Mutex::new(Some(error)),
            initiate_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        })
    }

    pub fn initiate_calls(&self) -> usize {
        self.initiate_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OperationBackend for ScriptedBackend {
    async fn initiate(
        &self,
        _request: &InitiateRequest,
    ) -> Result<InitiateReceipt, InitiationError> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.initiate_error.lock().take() {
            return Err(error);
        }
        Ok(self.receipt.clone())
    }

    async fn poll(
        &self,
        _kind: OperationKind,
        _operation_id: &str,
    ) -> Result<StatusReport, PollError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .expect("poll called beyond scripted responses");
        next.into_result()
    }
}
