//! The backend capability seam.
//!
//! [`OperationBackend`] is the one pluggable boundary of the crate: the real
//! HTTP implementation lives in [`http`](crate::http), and tests substitute
//! scripted in-memory fakes. There is deliberately exactly one manager over
//! this trait rather than parallel per-flow copies of the initiate/poll
//! logic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{InitiationError, PollError};
use crate::session::OperationKind;

/// Kind-specific payload for creating a remote operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitiateRequest {
    /// Start a hosted checkout session for a purchase package.
    Checkout { package: String },
    /// Submit a model for compression.
    Compression {
        model_file: String,
        compression_level: u8,
        techniques: Vec<String>,
    },
    /// Submit a model for verification.
    Verification { model_file: String },
}

impl InitiateRequest {
    /// Checkout request for the founder tier package.
    pub fn founder_checkout() -> Self {
        InitiateRequest::Checkout {
            package: "founder".into(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            InitiateRequest::Checkout { .. } => OperationKind::PaymentCheckout,
            InitiateRequest::Compression { .. } => OperationKind::ModelCompression,
            InitiateRequest::Verification { .. } => OperationKind::ModelVerification,
        }
    }
}

/// What a successful initiation call hands back.
///
/// `redirect_url` is only populated for checkout: navigating there is the
/// caller's terminal action for the current page lifecycle, not a polling
/// start.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InitiateReceipt {
    pub operation_id: String,
    pub redirect_url: Option<String>,
}

impl InitiateReceipt {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            redirect_url: None,
        }
    }

    #[must_use]
    pub fn with_redirect(mut self, url: impl Into<String>) -> Self {
        self.redirect_url = Some(url.into());
        self
    }
}

/// Remote-reported operation status, normalized across backends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteStatus {
    /// Still running; `progress` is best-effort and may be absent.
    Processing {
        #[serde(default)]
        progress: Option<u8>,
    },
    /// Terminal success with the kind-specific result payload.
    Completed {
        #[serde(default)]
        payload: Value,
    },
    /// Terminal failure; `message` is shown to the user when present.
    Failed {
        #[serde(default)]
        message: Option<String>,
    },
}

impl RemoteStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RemoteStatus::Processing { .. })
    }
}

/// One status-check response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: RemoteStatus,
}

impl StatusReport {
    pub fn processing(progress: Option<u8>) -> Self {
        Self {
            status: RemoteStatus::Processing { progress },
        }
    }

    pub fn completed(payload: Value) -> Self {
        Self {
            status: RemoteStatus::Completed { payload },
        }
    }

    pub fn failed(message: Option<String>) -> Self {
        Self {
            status: RemoteStatus::Failed { message },
        }
    }
}

/// Remote service that hosts asynchronous operations.
///
/// `initiate` performs exactly one network call and never polls; `poll`
/// performs exactly one status query. The poller guarantees at most one
/// in-flight `poll` per session at a time, so implementations need no
/// internal sequencing.
#[async_trait]
pub trait OperationBackend: Send + Sync {
    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateReceipt, InitiationError>;

    async fn poll(
        &self,
        kind: OperationKind,
        operation_id: &str,
    ) -> Result<StatusReport, PollError>;
}
