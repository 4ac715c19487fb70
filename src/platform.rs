//! Outbound side of the chat platform.
//!
//! The core only talks to the platform through [`ChatPlatform`], which keeps
//! the router and orchestrator testable without a live bot.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{CallbackQueryId, ChatAction, FileId, InputFile, MessageId};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoPayload {
    Url(String),
    Bytes { data: Vec<u8>, file_name: String },
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Sends a text message and returns its message id.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i32>;

    async fn send_photo(&self, chat_id: i64, photo: PhotoPayload, caption: &str) -> Result<()>;

    async fn edit_text(&self, chat_id: i64, message_id: i32, text: &str) -> Result<()>;

    async fn send_upload_action(&self, chat_id: i64) -> Result<()>;

    /// Acknowledges a button press so the client stops its spinner.
    async fn answer_callback(&self, query_id: &str) -> Result<()>;

    /// Turns a platform file id into a URL the webhook can fetch.
    async fn resolve_file_url(&self, file_id: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatPlatform for TelegramPlatform {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i32> {
        let sent = self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(sent.id.0)
    }

    async fn send_photo(&self, chat_id: i64, photo: PhotoPayload, caption: &str) -> Result<()> {
        let input = match photo {
            PhotoPayload::Url(raw) => {
                let url =
                    Url::parse(&raw).map_err(|err| anyhow!("invalid image url {raw}: {err}"))?;
                InputFile::url(url)
            }
            PhotoPayload::Bytes { data, file_name } => InputFile::memory(data).file_name(file_name),
        };
        self.bot
            .send_photo(ChatId(chat_id), input)
            .caption(caption)
            .await?;
        Ok(())
    }

    async fn edit_text(&self, chat_id: i64, message_id: i32, text: &str) -> Result<()> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text)
            .await?;
        Ok(())
    }

    async fn send_upload_action(&self, chat_id: i64) -> Result<()> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::UploadPhoto)
            .await?;
        Ok(())
    }

    async fn answer_callback(&self, query_id: &str) -> Result<()> {
        self.bot
            .answer_callback_query(CallbackQueryId(query_id.to_string()))
            .await?;
        Ok(())
    }

    async fn resolve_file_url(&self, file_id: &str) -> Result<String> {
        let file = self.bot.get_file(FileId(file_id.to_string())).await?;
        Ok(format!(
            "https://api.telegram.org/file/bot{}/{}",
            self.bot.token(),
            file.path
        ))
    }
}
