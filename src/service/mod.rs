use std::pin::Pin;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::PipelineError;

/// Per-artifact generation toggles carried on the processing request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    pub generate_summary: bool,
    pub generate_key_points: bool,
    pub generate_action_items: bool,
    pub generate_timestamps: bool,
}

impl GenerationOptions {
    /// Everything on, the CLI default when no flag is given.
    pub fn all() -> Self {
        Self {
            generate_summary: true,
            generate_key_points: true,
            generate_action_items: true,
            generate_timestamps: true,
        }
    }

    pub fn any(&self) -> bool {
        self.generate_summary
            || self.generate_key_points
            || self.generate_action_items
            || self.generate_timestamps
    }
}

/// Request issued to the processing service for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRequest {
    pub storage_key: String,
    pub job_id: Uuid,
    #[serde(flatten)]
    pub options: GenerationOptions,
    pub stream: bool,
}

/// Raw byte chunks of the long-lived event-stream response
pub type EventByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Client seam for the processing service
#[async_trait]
pub trait ProcessingClient: Send + Sync {
    /// Issue the processing request and return the response byte stream.
    async fn open_stream(&self, request: &ProcessingRequest) -> Result<EventByteStream>;
}

/// HTTP implementation over reqwest
pub struct HttpProcessingClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpProcessingClient {
    pub fn new(endpoint: Url, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl ProcessingClient for HttpProcessingClient {
    async fn open_stream(&self, request: &ProcessingRequest) -> Result<EventByteStream> {
        tracing::info!(job_id = %request.job_id, "issuing processing request");

        let mut builder = self.http.post(self.endpoint.clone()).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("failed to reach processing service")?;

        if !response.status().is_success() {
            return Err(PipelineError::Transport(response.status().as_u16()).into());
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(anyhow::Error::from));

        Ok(Box::pin(stream))
    }
}
