pub mod callbacks;
pub mod commands;
pub mod messages;

use tracing::warn;

use crate::state::AppState;

/// Sends a plain notice, logging instead of failing when delivery breaks.
pub(crate) async fn notify(state: &AppState, chat_id: i64, text: &str) -> Option<i32> {
    match state.platform.send_text(chat_id, text).await {
        Ok(message_id) => Some(message_id),
        Err(err) => {
            warn!("Failed to send message to chat {chat_id}: {err}");
            None
        }
    }
}
