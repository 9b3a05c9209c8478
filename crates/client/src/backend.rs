//! Transport to the journal-generation backend.
//!
//! [`WorkflowBackend`] is the seam between the session controller and
//! the network: one push connection plus the two pull operations the
//! controller needs (snapshot fetch, cancellation request). The
//! production implementation is [`HttpBackend`]; tests substitute a
//! scripted fake.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use journ_core::snapshot::WorkflowSnapshot;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// A live push connection, yielding raw text frames until it closes.
pub type FrameStream = BoxStream<'static, Result<String, BackendError>>;

/// Errors from the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Failed to establish or keep the push connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Backend API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Operations the session controller needs from the backend.
#[async_trait]
pub trait WorkflowBackend: Send + Sync + 'static {
    /// Open the per-workflow push connection.
    async fn connect(&self, workflow_id: &str) -> Result<FrameStream, BackendError>;

    /// Fetch the server's full snapshot of the workflow.
    async fn fetch_snapshot(&self, workflow_id: &str) -> Result<WorkflowSnapshot, BackendError>;

    /// Ask the server to cancel the workflow.
    ///
    /// A 2xx response means the request was accepted, not that the
    /// workflow has terminated.
    async fn request_cancel(&self, workflow_id: &str) -> Result<(), BackendError>;
}

/// Production backend speaking WebSocket + HTTP.
pub struct HttpBackend {
    client: reqwest::Client,
    api_url: String,
    ws_url: String,
}

impl HttpBackend {
    /// Create a backend for the given base URLs.
    ///
    /// * `api_url` - HTTP base URL, e.g. `http://host:8000`.
    /// * `ws_url`  - WebSocket base URL, e.g. `ws://host:8000`.
    pub fn new(api_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            ws_url: ws_url.into(),
        }
    }

    /// Create a backend from a [`crate::config::ClientConfig`].
    pub fn from_config(config: &crate::config::ClientConfig) -> Self {
        Self::new(config.api_url.clone(), config.ws_url.clone())
    }

    /// Ensure the response has a success status code, or map it to a
    /// [`BackendError::Api`] carrying the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl WorkflowBackend for HttpBackend {
    async fn connect(&self, workflow_id: &str) -> Result<FrameStream, BackendError> {
        // A unique client ID lets the server address frames to this
        // specific subscriber.
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = format!(
            "{}/ws/workflow/{}?clientId={}",
            self.ws_url, workflow_id, client_id
        );

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            BackendError::Connection(format!("Failed to connect to {}: {e}", self.ws_url))
        })?;

        tracing::info!(
            workflow_id,
            client_id = %client_id,
            "Connected to workflow socket at {}",
            self.ws_url,
        );

        let frames = ws_stream.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Binary(_)) => {
                    // The workflow channel is text-only; binary frames
                    // are ignored.
                    tracing::trace!("Ignoring binary frame");
                    None
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Handled automatically by tungstenite.
                    None
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Workflow socket closed");
                    None
                }
                Ok(Message::Frame(_)) => None,
                Err(e) => Some(Err(BackendError::Connection(e.to_string()))),
            }
        });

        Ok(frames.boxed())
    }

    async fn fetch_snapshot(&self, workflow_id: &str) -> Result<WorkflowSnapshot, BackendError> {
        let response = self
            .client
            .get(format!("{}/workflow-status/{}", self.api_url, workflow_id))
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.json::<WorkflowSnapshot>().await?)
    }

    async fn request_cancel(&self, workflow_id: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .post(format!("{}/cancel-workflow/{}", self.api_url, workflow_id))
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }
}
