use tracing::info;

use super::notify;
use crate::config::{HELP_MESSAGE, WELCOME_MESSAGE};
use crate::state::AppState;

/// Resets the user's session and shows the greeting. An in-flight request
/// keeps its gate; only the owning background unit may release it.
pub async fn start_handler(state: &AppState, user_id: i64, chat_id: i64) {
    let session = state.sessions.reset(user_id);
    info!(
        "Session initialized for user {user_id} at {}",
        session.started_at.to_rfc3339()
    );
    notify(state, chat_id, WELCOME_MESSAGE).await;
}

pub async fn help_handler(state: &AppState, chat_id: i64) {
    notify(state, chat_id, HELP_MESSAGE).await;
}
