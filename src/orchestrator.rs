//! Background units for admitted requests.
//!
//! Each admitted photo becomes one tracked task that moves through
//! `started -> dispatched -> completed`. The task owns the user's
//! [`GatePermit`], so the gate is released exactly once however the task
//! ends: normal completion, handled failure, panic, or cancellation at
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::{
    FAILURE_MESSAGE, PROGRESS_DONE_MESSAGE, PROGRESS_FAILED_MESSAGE, SUCCESS_MESSAGE,
    TIMEOUT_MESSAGE, UNEXPECTED_FAILURE_MESSAGE,
};
use crate::dispatch::{DispatchError, DispatchPool, GenerationRequest, GenerationResult};
use crate::gate::GatePermit;
use crate::platform::{ChatPlatform, PhotoPayload};
use crate::utils::telegram::start_upload_heartbeat;
use crate::utils::timing::GenerationTimer;

type DispatchOutcome = Result<GenerationResult, DispatchError>;

/// A request that passed the gate, plus the acknowledgment to update later.
#[derive(Debug, Clone)]
pub struct AcceptedRequest {
    pub request: GenerationRequest,
    pub ack_message_id: Option<i32>,
}

/// The single user-facing notification chosen for a finished request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultNotice {
    Photo { photo: PhotoPayload, caption: String },
    Text(String),
}

#[derive(Clone)]
pub struct Orchestrator {
    pool: Arc<DispatchPool>,
    platform: Arc<dyn ChatPlatform>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

struct AbortOnDrop(JoinHandle<&'static str>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Orchestrator {
    pub fn new(pool: Arc<DispatchPool>, platform: Arc<dyn ChatPlatform>) -> Self {
        Self {
            pool,
            platform,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Background units still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Hands the request to its own task and returns immediately.
    pub fn spawn(&self, accepted: AcceptedRequest, permit: GatePermit) -> JoinHandle<()> {
        let pool = self.pool.clone();
        let platform = self.platform.clone();
        let cancel = self.cancel.clone();

        self.tracker.spawn(async move {
            let _permit = permit;
            let user_id = accepted.request.user_id;
            let chat_id = accepted.request.chat_id;
            info!("Starting background task for user {user_id}");
            let mut timer = GenerationTimer::start(user_id, chat_id);

            // A panic anywhere below surfaces as a JoinError instead of tearing
            // down this task before the generic notice goes out.
            let mut unit = AbortOnDrop(tokio::spawn(process_request(
                pool,
                platform.clone(),
                accepted,
            )));
            let joined = tokio::select! {
                joined = &mut unit.0 => joined,
                _ = cancel.cancelled() => {
                    warn!("Background task for user {user_id} cancelled by shutdown");
                    timer.mark_status("cancelled", Some("shutdown".to_string()));
                    return;
                }
            };

            match joined {
                Ok(status) => timer.mark_status(status, None),
                Err(err) => {
                    error!("Error in background task for user {user_id}: {err}");
                    timer.mark_status("panic", Some(err.to_string()));
                    if let Err(err) = platform
                        .send_text(chat_id, UNEXPECTED_FAILURE_MESSAGE)
                        .await
                    {
                        warn!("Failed to notify user {user_id} about failure: {err}");
                    }
                }
            }
            info!("Completed background task for user {user_id}");
        })
    }

    /// Waits up to `grace` for running units, then cancels the rest. Cancelled
    /// units still release their gate.
    pub async fn shutdown(&self, grace: Duration) {
        self.tracker.close();
        info!(
            "Waiting for {} background task(s) to finish",
            self.tracker.len()
        );
        if timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                "Grace period elapsed with {} task(s) running; cancelling",
                self.tracker.len()
            );
            self.cancel.cancel();
            self.tracker.wait().await;
        }
        info!("Background tasks stopped");
    }
}

async fn process_request(
    pool: Arc<DispatchPool>,
    platform: Arc<dyn ChatPlatform>,
    accepted: AcceptedRequest,
) -> &'static str {
    let AcceptedRequest {
        request,
        ack_message_id,
    } = accepted;
    let user_id = request.user_id;
    let chat_id = request.chat_id;

    let outcome = {
        let _heartbeat = start_upload_heartbeat(platform.clone(), chat_id);
        debug!(
            "Dispatching request for user {user_id} ({} queued)",
            pool.queued()
        );
        pool.dispatch(request).await
    };

    let status = outcome_status(&outcome);
    match &outcome {
        Ok(result) => debug!("Dispatch finished for user {user_id}: success={}", result.success),
        Err(err) => warn!("Dispatch failed for user {user_id}: {err}"),
    }

    if let Some(message_id) = ack_message_id {
        let progress = if status == "success" {
            PROGRESS_DONE_MESSAGE
        } else {
            PROGRESS_FAILED_MESSAGE
        };
        if let Err(err) = platform.edit_text(chat_id, message_id, progress).await {
            debug!("Failed to update progress message for user {user_id}: {err}");
        }
    }

    deliver_notice(platform.as_ref(), chat_id, result_notice(&outcome)).await;
    status
}

fn outcome_status(outcome: &DispatchOutcome) -> &'static str {
    match outcome {
        Ok(result) if result.success => "success",
        Ok(_) => "failed",
        Err(err) => err.kind(),
    }
}

pub fn result_notice(outcome: &DispatchOutcome) -> ResultNotice {
    let result = match outcome {
        Ok(result) if result.success => result,
        Ok(_) => return ResultNotice::Text(FAILURE_MESSAGE.to_string()),
        Err(DispatchError::Timeout(_)) => return ResultNotice::Text(TIMEOUT_MESSAGE.to_string()),
        Err(_) => return ResultNotice::Text(FAILURE_MESSAGE.to_string()),
    };

    if let Some(url) = non_empty(result.image_url.as_deref()) {
        return ResultNotice::Photo {
            photo: PhotoPayload::Url(url.to_string()),
            caption: SUCCESS_MESSAGE.to_string(),
        };
    }
    if let Some(raw) = non_empty(result.image_data.as_deref()) {
        match decode_image_data(raw) {
            Some((data, file_name)) => {
                return ResultNotice::Photo {
                    photo: PhotoPayload::Bytes { data, file_name },
                    caption: SUCCESS_MESSAGE.to_string(),
                };
            }
            None => warn!("Webhook returned image_data that is not valid base64"),
        }
    }
    if let Some(message) = non_empty(result.message.as_deref()) {
        return ResultNotice::Text(message.to_string());
    }
    ResultNotice::Text(SUCCESS_MESSAGE.to_string())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Decodes plain or `data:` URI base64 image data and picks a file name
/// from the sniffed format.
fn decode_image_data(raw: &str) -> Option<(Vec<u8>, String)> {
    let encoded = raw
        .split_once(";base64,")
        .map(|(_, data)| data)
        .unwrap_or(raw);
    let data = BASE64.decode(encoded.trim()).ok()?;
    if data.is_empty() {
        return None;
    }
    let extension = infer::get(&data)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map(|kind| kind.extension())
        .unwrap_or("jpg");
    Some((data, format!("portrait.{extension}")))
}

async fn deliver_notice(platform: &dyn ChatPlatform, chat_id: i64, notice: ResultNotice) {
    let delivered = match notice {
        ResultNotice::Photo { photo, caption } => {
            match platform.send_photo(chat_id, photo, &caption).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    warn!("Failed to send result photo to chat {chat_id}: {err}");
                    platform.send_text(chat_id, &caption).await.map(|_| ())
                }
            }
        }
        ResultNotice::Text(text) => platform.send_text(chat_id, &text).await.map(|_| ()),
    };
    if let Err(err) = delivered {
        warn!("Failed to deliver result to chat {chat_id}: {err}");
    }
}
