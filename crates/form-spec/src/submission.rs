use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::mapping::to_object;
use crate::session::ValueMap;
use crate::spec::webhook::HttpMethod;
use crate::transport::{HttpRequest, HttpTransport, TransportError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SubmissionError {
    #[error("submission rejected with status {status}")]
    Rejected { status: u16 },
    #[error("submission failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Receives the merged cross-step values when the last step completes.
#[async_trait]
pub trait SubmissionHandler: Send + Sync {
    async fn submit(&self, values: &ValueMap) -> Result<(), SubmissionError>;
}

/// POSTs the merged values as JSON to the form endpoint.
pub struct HttpSubmissionHandler {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
}

impl HttpSubmissionHandler {
    pub fn new(transport: Arc<dyn HttpTransport>, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SubmissionHandler for HttpSubmissionHandler {
    async fn submit(&self, values: &ValueMap) -> Result<(), SubmissionError> {
        let mut request = HttpRequest::new(HttpMethod::Post, self.endpoint.clone());
        request
            .headers
            .insert("Content-Type".into(), "application/json".into());
        request.body = Some(to_object(values));

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(SubmissionError::Rejected {
                status: response.status,
            });
        }
        tracing::info!(endpoint = %self.endpoint, "form submitted");
        Ok(())
    }
}

/// Keeps nothing; useful when the caller reads the completed values itself.
pub struct NoopSubmission;

#[async_trait]
impl SubmissionHandler for NoopSubmission {
    async fn submit(&self, _values: &ValueMap) -> Result<(), SubmissionError> {
        Ok(())
    }
}

