//! In-memory stand-ins for the chat platform and the generation webhook.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::dispatch::{DispatchError, GenerationBackend, GenerationRequest, GenerationResult};
use crate::platform::{ChatPlatform, PhotoPayload};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text { chat_id: i64, text: String },
    Photo { chat_id: i64, photo: PhotoPayload, caption: String },
    Edit { chat_id: i64, message_id: i32, text: String },
    CallbackAnswer { query_id: String },
}

#[derive(Default)]
pub struct RecordingPlatform {
    sent: Mutex<Vec<Sent>>,
    next_message_id: AtomicI32,
    fail_sends: AtomicBool,
    fail_photos: AtomicBool,
    panic_on_next_text: AtomicBool,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let platform = Self::default();
        platform.fail_sends.store(true, Ordering::SeqCst);
        platform
    }

    pub fn fail_photos(&self) {
        self.fail_photos.store(true, Ordering::SeqCst);
    }

    pub fn panic_on_next_text(&self) {
        self.panic_on_next_text.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|sent| match sent {
                Sent::Text { chat_id: to, text } if *to == chat_id => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, sent: Sent) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(anyhow!("chat platform unavailable"));
        }
        self.sent.lock().push(sent);
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i32> {
        if self.panic_on_next_text.swap(false, Ordering::SeqCst) {
            panic!("platform blew up while sending text");
        }
        self.record(Sent::Text {
            chat_id,
            text: text.to_string(),
        })?;
        Ok(self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn send_photo(&self, chat_id: i64, photo: PhotoPayload, caption: &str) -> Result<()> {
        if self.fail_photos.load(Ordering::SeqCst) {
            return Err(anyhow!("photo rejected"));
        }
        self.record(Sent::Photo {
            chat_id,
            photo,
            caption: caption.to_string(),
        })
    }

    async fn edit_text(&self, chat_id: i64, message_id: i32, text: &str) -> Result<()> {
        self.record(Sent::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
        })
    }

    async fn send_upload_action(&self, _chat_id: i64) -> Result<()> {
        Ok(())
    }

    async fn answer_callback(&self, query_id: &str) -> Result<()> {
        self.record(Sent::CallbackAnswer {
            query_id: query_id.to_string(),
        })
    }

    async fn resolve_file_url(&self, file_id: &str) -> Result<String> {
        if file_id == "missing" {
            return Err(anyhow!("file not found"));
        }
        Ok(format!("https://files.example.com/{file_id}.jpg"))
    }
}

#[derive(Debug, Clone)]
pub enum Script {
    Reply(GenerationResult),
    Timeout,
    Malformed,
    Panic,
    Hang,
    /// Waits until [`ScriptedBackend::release`] is called, then succeeds.
    Gated,
}

impl Script {
    pub fn success() -> Self {
        Script::Reply(GenerationResult {
            success: true,
            ..GenerationResult::default()
        })
    }
}

pub struct ScriptedBackend {
    script: Script,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
    gate: Semaphore,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            gate: Semaphore::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        match &self.script {
            Script::Reply(result) => Ok(result.clone()),
            Script::Timeout => Err(DispatchError::Timeout(Duration::from_secs(180))),
            Script::Malformed => Err(DispatchError::Transport(
                "unparseable webhook response: expected value at line 1 column 1".to_string(),
            )),
            Script::Panic => panic!("backend exploded"),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(DispatchError::Timeout(Duration::from_secs(3600)))
            }
            Script::Gated => {
                if let Ok(permit) = self.gate.acquire().await {
                    permit.forget();
                }
                Ok(GenerationResult {
                    success: true,
                    ..GenerationResult::default()
                })
            }
        }
    }
}
