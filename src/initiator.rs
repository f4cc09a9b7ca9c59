//! Session initiation: one network call, one new session, no polling.

use std::sync::Arc;

use tracing::instrument;

use crate::backend::{InitiateRequest, OperationBackend};
use crate::errors::InitiationError;
use crate::session::OperationSession;

/// A freshly initiated operation.
///
/// For checkout, `redirect_url` points at the externally hosted checkout
/// page; navigating there ends the current page lifecycle and polling is
/// resumed later from the return URL.
#[derive(Clone, Debug)]
pub struct InitiatedOperation {
    pub session: OperationSession,
    pub redirect_url: Option<String>,
}

/// Starts remote operations. Performs exactly one network call per
/// initiation and never polls; polling is a separate explicit step so
/// callers can defer it.
#[derive(Clone)]
pub struct SessionInitiator {
    backend: Arc<dyn OperationBackend>,
}

impl SessionInitiator {
    pub fn new(backend: Arc<dyn OperationBackend>) -> Self {
        Self { backend }
    }

    #[instrument(skip(self, request), fields(kind = %request.kind()), err)]
    pub async fn initiate(
        &self,
        request: &InitiateRequest,
    ) -> Result<InitiatedOperation, InitiationError> {
        let receipt = self.backend.initiate(request).await?;
        tracing::info!(
            operation_id = %receipt.operation_id,
            has_redirect = receipt.redirect_url.is_some(),
            "operation initiated"
        );
        let session = OperationSession::new(receipt.operation_id, request.kind());
        Ok(InitiatedOperation {
            session,
            redirect_url: receipt.redirect_url,
        })
    }
}
