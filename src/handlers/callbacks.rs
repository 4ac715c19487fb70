use tracing::{debug, warn};

use crate::state::AppState;

/// Answers any button press. The bot sends no inline keyboards of its own, so
/// stale buttons only need their loading state cleared.
pub async fn handle_callback(state: &AppState, query_id: &str) {
    debug!("Answering callback query {query_id}");
    if let Err(err) = state.platform.answer_callback(query_id).await {
        warn!("Failed to answer callback query {query_id}: {err}");
    }
}
