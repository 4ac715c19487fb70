pub mod pool;
pub mod webhook;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::session::GenerationSettings;

pub use pool::DispatchPool;
pub use webhook::WebhookClient;

/// One accepted photo on its way to the generation webhook.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_id: i64,
    pub chat_id: i64,
    pub settings: GenerationSettings,
    pub photo_url: String,
}

/// Parsed webhook reply. Only `success` is guaranteed to be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GenerationResult {
    pub success: bool,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_data: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("webhook did not respond within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("webhook transport failure: {0}")]
    Transport(String),
    #[error("dispatch worker dropped the request")]
    Aborted,
    #[error("dispatch pool is shut down")]
    PoolClosed,
}

impl DispatchError {
    /// Short label used in timing logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Timeout(_) => "timeout",
            DispatchError::Transport(_) => "transport",
            DispatchError::Aborted => "aborted",
            DispatchError::PoolClosed => "pool_closed",
        }
    }
}

/// Performs a single generation call. The webhook client is the production
/// implementation; tests plug in scripted backends.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest)
        -> Result<GenerationResult, DispatchError>;
}

pub fn parse_generation_result(body: &[u8]) -> Result<GenerationResult, DispatchError> {
    serde_json::from_slice::<GenerationResult>(body)
        .map_err(|err| DispatchError::Transport(format!("unparseable webhook response: {err}")))
}
