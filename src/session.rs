use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value as JsonValue};

/// Per-user generation settings forwarded to the webhook untouched.
pub type GenerationSettings = Map<String, JsonValue>;

#[derive(Debug, Clone)]
pub struct UserSession {
    pub settings: GenerationSettings,
    pub started_at: DateTime<Utc>,
}

impl UserSession {
    fn fresh() -> Self {
        UserSession {
            settings: GenerationSettings::new(),
            started_at: Utc::now(),
        }
    }
}

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<i64, UserSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the user's session to empty settings and returns the new one.
    pub fn reset(&self, user_id: i64) -> UserSession {
        let session = UserSession::fresh();
        self.sessions.lock().insert(user_id, session.clone());
        session
    }

    pub fn settings_for(&self, user_id: i64) -> GenerationSettings {
        self.sessions
            .lock()
            .get(&user_id)
            .map(|session| session.settings.clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn get(&self, user_id: i64) -> Option<UserSession> {
        self.sessions.lock().get(&user_id).cloned()
    }

    #[cfg(test)]
    pub fn set_setting(&self, user_id: i64, key: &str, value: JsonValue) {
        self.sessions
            .lock()
            .entry(user_id)
            .or_insert_with(UserSession::fresh)
            .settings
            .insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_gets_empty_settings() {
        let store = SessionStore::new();
        assert!(store.settings_for(11).is_empty());
        assert!(store.get(11).is_none());
    }

    #[test]
    fn reset_clears_previous_settings() {
        let store = SessionStore::new();
        store.set_setting(11, "style", JsonValue::String("noir".into()));
        assert_eq!(store.settings_for(11).len(), 1);

        let before = Utc::now();
        let session = store.reset(11);
        assert!(session.settings.is_empty());
        assert!(session.started_at >= before);
        assert!(store.settings_for(11).is_empty());
        assert!(store.get(11).is_some());
    }
}
