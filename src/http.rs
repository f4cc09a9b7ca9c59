//! HTTP implementation of [`OperationBackend`].
//!
//! Thin request/response glue over the remote service: checkout sessions go
//! through the Stripe-fronting endpoints, compression and verification jobs
//! through the inference API. Auth is a caller-supplied bearer token; this
//! crate never issues or validates tokens.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use crate::backend::{InitiateReceipt, InitiateRequest, OperationBackend, StatusReport};
use crate::errors::{InitiationError, PollError};
use crate::session::OperationKind;

#[derive(Deserialize)]
struct CheckoutCreated {
    session_id: Option<String>,
    checkout_url: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct JobCreated {
    job_id: String,
}

/// Backend speaking the remote service's JSON API over HTTP.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
        }
    }

    /// Resolve base URL and bearer token from the environment
    /// (`OPWATCH_BASE_URL`, `OPWATCH_BEARER_TOKEN`), loading `.env` first.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let base_url =
            std::env::var("OPWATCH_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".into());
        let mut backend = Self::new(base_url);
        if let Ok(token) = std::env::var("OPWATCH_BEARER_TOKEN") {
            backend.bearer_token = Some(token);
        }
        backend
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Response, InitiationError> {
        self.authorize(self.client.post(self.url(path)).json(&body))
            .send()
            .await
            .map_err(|e| InitiationError::Transport {
                message: e.to_string(),
            })
    }

    /// Map job-status bodies (`{ status, progress?, error?, ... }`) into the
    /// normalized report. Unknown status strings are malformed, not ignored.
    fn map_job_status(body: Value) -> Result<StatusReport, PollError> {
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| PollError::MalformedResponse("missing status field".into()))?;
        match status {
            "processing" | "pending" => {
                let progress = body
                    .get("progress")
                    .and_then(Value::as_u64)
                    .map(|p| p.min(100) as u8);
                Ok(StatusReport::processing(progress))
            }
            "completed" => Ok(StatusReport::completed(body)),
            "failed" => {
                let message = body
                    .get("error")
                    .or_else(|| body.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(StatusReport::failed(message))
            }
            other => Err(PollError::MalformedResponse(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

async fn body_text(response: Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".into())
}

fn check_initiate_status(status: StatusCode, body: &str) -> Result<(), InitiationError> {
    if status.is_client_error() {
        return Err(InitiationError::Rejected {
            status: status.as_u16(),
            message: body.to_string(),
        });
    }
    if status.is_server_error() {
        return Err(InitiationError::Upstream {
            status: status.as_u16(),
            message: body.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl OperationBackend for HttpBackend {
    #[instrument(skip(self, request), fields(kind = %request.kind()))]
    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateReceipt, InitiationError> {
        match request {
            InitiateRequest::Checkout { package } => {
                let response = self
                    .post_json(
                        "/api/stripe/create-checkout-session",
                        serde_json::json!({ "package": package }),
                    )
                    .await?;
                let status = response.status();
                let text = body_text(response).await;
                check_initiate_status(status, &text)?;
                let created: CheckoutCreated = serde_json::from_str(&text)
                    .map_err(|e| InitiationError::MalformedResponse(e.to_string()))?;
                if let Some(error) = created.error {
                    return Err(InitiationError::Rejected {
                        status: status.as_u16(),
                        message: error,
                    });
                }
                let session_id = created.session_id.ok_or_else(|| {
                    InitiationError::MalformedResponse("missing session_id".into())
                })?;
                let mut receipt = InitiateReceipt::new(session_id);
                if let Some(url) = created.checkout_url {
                    receipt = receipt.with_redirect(url);
                }
                Ok(receipt)
            }
            InitiateRequest::Compression {
                model_file,
                compression_level,
                techniques,
            } => {
                let response = self
                    .post_json(
                        "/api/compress",
                        serde_json::json!({
                            "model_file": model_file,
                            "compression_level": compression_level,
                            "techniques": techniques,
                        }),
                    )
                    .await?;
                let status = response.status();
                let text = body_text(response).await;
                check_initiate_status(status, &text)?;
                let created: JobCreated = serde_json::from_str(&text)
                    .map_err(|e| InitiationError::MalformedResponse(e.to_string()))?;
                Ok(InitiateReceipt::new(created.job_id))
            }
            InitiateRequest::Verification { model_file } => {
                let response = self
                    .post_json("/api/verify", serde_json::json!({ "model_file": model_file }))
                    .await?;
                let status = response.status();
                let text = body_text(response).await;
                check_initiate_status(status, &text)?;
                let created: JobCreated = serde_json::from_str(&text)
                    .map_err(|e| InitiationError::MalformedResponse(e.to_string()))?;
                Ok(InitiateReceipt::new(created.job_id))
            }
        }
    }

    #[instrument(skip(self), fields(kind = %kind))]
    async fn poll(
        &self,
        kind: OperationKind,
        operation_id: &str,
    ) -> Result<StatusReport, PollError> {
        let path = match kind {
            OperationKind::PaymentCheckout => format!("/api/stripe/verify/{operation_id}"),
            OperationKind::ModelCompression => format!("/api/compress/{operation_id}/status"),
            OperationKind::ModelVerification => format!("/api/verify/{operation_id}/status"),
        };
        let response = self
            .authorize(self.client.get(self.url(&path)))
            .send()
            .await
            .map_err(|e| PollError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Transport {
                message: format!("status check returned {status}"),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PollError::MalformedResponse(e.to_string()))?;

        match kind {
            OperationKind::PaymentCheckout => {
                let success = body
                    .get("success")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| PollError::MalformedResponse("missing success field".into()))?;
                if success {
                    Ok(StatusReport::completed(body))
                } else {
                    let message = body
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    Ok(StatusReport::failed(message))
                }
            }
            OperationKind::ModelCompression | OperationKind::ModelVerification => {
                Self::map_job_status(body)
            }
        }
    }
}
