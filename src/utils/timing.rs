use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

/// Timing record for one admitted generation request, written to the
/// `bot.timing` target.
#[derive(Debug)]
pub struct GenerationTimer {
    user_id: i64,
    chat_id: i64,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

impl GenerationTimer {
    pub fn start(user_id: i64, chat_id: i64) -> Self {
        let timer = GenerationTimer {
            user_id,
            chat_id,
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "cancelled".to_string(),
            detail: None,
            completed: false,
        };
        info!(
            target: "bot.timing",
            "event=generation_accepted user_id={} chat_id={} accepted_at={}",
            timer.user_id,
            timer.chat_id,
            timer.started_at.to_rfc3339()
        );
        timer
    }

    pub fn mark_status(&mut self, status: &str, detail: Option<String>) {
        self.status = status.to_string();
        self.detail = detail;
    }

    pub fn complete(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let completed_at = Utc::now();
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: "bot.timing",
            "event=generation_completed user_id={} chat_id={} started_at={} completed_at={} duration_s={:.3} status={} detail={}",
            self.user_id,
            self.chat_id,
            self.started_at.to_rfc3339(),
            completed_at.to_rfc3339(),
            duration,
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

impl Drop for GenerationTimer {
    fn drop(&mut self) {
        // Units that are cancelled or unwind still get a completion record.
        self.complete();
    }
}
