use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::notify;
use crate::config::{
    ACCEPTED_MESSAGE, BUSY_MESSAGE, DOCUMENT_HINT_MESSAGE, PHOTO_UNAVAILABLE_MESSAGE,
    SEND_PHOTO_MESSAGE,
};
use crate::dispatch::GenerationRequest;
use crate::orchestrator::AcceptedRequest;
use crate::state::AppState;

#[derive(Debug)]
pub enum PhotoAdmission {
    /// The user already has a request in flight; nothing was changed.
    Busy,
    /// The photo could not be resolved to a download URL.
    Unavailable,
    Accepted(JoinHandle<()>),
}

/// Admits a photo if the user is free and hands it to a background unit.
/// Returns without waiting for the generation.
pub async fn handle_photo(
    state: &AppState,
    user_id: i64,
    chat_id: i64,
    file_id: &str,
) -> PhotoAdmission {
    let Some(permit) = state.gate.try_acquire(user_id) else {
        info!("User {user_id} tried to send request while having active one");
        notify(state, chat_id, BUSY_MESSAGE).await;
        return PhotoAdmission::Busy;
    };

    let photo_url = match state.platform.resolve_file_url(file_id).await {
        Ok(url) => url,
        Err(err) => {
            warn!("Failed to resolve photo for user {user_id}: {err}");
            drop(permit);
            notify(state, chat_id, PHOTO_UNAVAILABLE_MESSAGE).await;
            return PhotoAdmission::Unavailable;
        }
    };

    let ack_message_id = notify(state, chat_id, ACCEPTED_MESSAGE).await;

    let request = GenerationRequest {
        user_id,
        chat_id,
        settings: state.sessions.settings_for(user_id),
        photo_url,
    };
    info!("Creating background task for user {}", permit.user_id());
    let handle = state.orchestrator.spawn(
        AcceptedRequest {
            request,
            ack_message_id,
        },
        permit,
    );
    PhotoAdmission::Accepted(handle)
}

pub async fn handle_text(state: &AppState, chat_id: i64) {
    notify(state, chat_id, SEND_PHOTO_MESSAGE).await;
}

pub async fn handle_document(state: &AppState, chat_id: i64, mime_type: Option<&str>) {
    let is_image = mime_type
        .map(|mime| mime.to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false);
    let text = if is_image {
        DOCUMENT_HINT_MESSAGE
    } else {
        SEND_PHOTO_MESSAGE
    };
    notify(state, chat_id, text).await;
}
