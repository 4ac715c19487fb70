use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::warn;
use url::Url;

pub const DEFAULT_WORKER_POOL_SIZE: usize = 20;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub n8n_webhook_url: Url,
    pub worker_pool_size: usize,
    pub request_timeout: Duration,
    pub shutdown_grace: Duration,
    pub log_level: String,
    /// Bad optional values that fell back to defaults. Logged once the
    /// subscriber is installed.
    pub warnings: Vec<String>,
}

fn lookup_string<F>(lookup: &F, name: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).unwrap_or_else(|| default.to_string())
}

fn lookup_required<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(name).unwrap_or_default();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{name} is required"));
    }
    Ok(trimmed.to_string())
}

fn lookup_u64<F>(lookup: &F, name: &str, default: u64, warnings: &mut Vec<String>) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => default,
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(value) => value,
            Err(_) => {
                warnings.push(format!("Invalid {name} value '{raw}'; using default {default}"));
                default
            }
        },
    }
}

fn parse_webhook_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|err| anyhow!("N8N_WEBHOOK_URL is not a valid URL: {err}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!(
            "N8N_WEBHOOK_URL must use http or https, got '{other}'"
        )),
    }
}

impl Config {
    /// Reads configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup_required(&lookup, "BOT_TOKEN")?;
        let n8n_webhook_url = parse_webhook_url(&lookup_required(&lookup, "N8N_WEBHOOK_URL")?)?;

        let mut warnings = Vec::new();
        let worker_pool_size = lookup_u64(
            &lookup,
            "N8N_WORKER_POOL_SIZE",
            DEFAULT_WORKER_POOL_SIZE as u64,
            &mut warnings,
        )
        .max(1) as usize;
        let request_timeout_secs = lookup_u64(
            &lookup,
            "N8N_REQUEST_TIMEOUT",
            DEFAULT_REQUEST_TIMEOUT_SECS,
            &mut warnings,
        )
        .max(1);
        let shutdown_grace_secs = lookup_u64(
            &lookup,
            "SHUTDOWN_GRACE_SECONDS",
            DEFAULT_SHUTDOWN_GRACE_SECS,
            &mut warnings,
        );

        Ok(Config {
            bot_token,
            n8n_webhook_url,
            worker_pool_size,
            request_timeout: Duration::from_secs(request_timeout_secs),
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
            log_level: lookup_string(&lookup, "LOG_LEVEL", "info").to_lowercase(),
            warnings,
        })
    }

    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            warn!("{warning}");
        }
    }
}

pub const WELCOME_MESSAGE: &str = "⚡ Welcome!\n\n📸 Send me a photo and I will turn it into a cinematic portrait.";

pub const HELP_MESSAGE: &str = "📸 Send one photo (not as a file) and wait 1-2 minutes for your portrait.\n\nYou can send a new photo once the previous one is finished.";

pub const SEND_PHOTO_MESSAGE: &str = "🙈 I don't understand words, I need your photo!\n\n📸 Send a picture of yourself to get a portrait.";

pub const DOCUMENT_HINT_MESSAGE: &str = "🖼 Please send the image as a photo, not as a file.";

pub const BUSY_MESSAGE: &str = "⏳ Not so fast! I'm still working on your previous photo.\n\nPlease wait until it's finished.";

pub const ACCEPTED_MESSAGE: &str = "✨ Got it! Starting on your portrait.\n\n⏳ This usually takes 1-2 minutes.";

pub const PHOTO_UNAVAILABLE_MESSAGE: &str = "⚠️ I couldn't download your photo.\n\nPlease send it again.";

pub const SUCCESS_MESSAGE: &str = "✅ Your portrait is ready.\n\n📸 Send a new photo if you want another one.";

pub const FAILURE_MESSAGE: &str = "⚠️ I couldn't create the portrait.\n\nPlease try again in a couple of minutes.";

pub const TIMEOUT_MESSAGE: &str = "⏱ Generation took too long.\n\nPlease try again later.";

pub const UNEXPECTED_FAILURE_MESSAGE: &str = "❌ Something went wrong.\n\nIt will be fixed soon, please try again later.";

pub const PROGRESS_DONE_MESSAGE: &str = "✅ Done.";

pub const PROGRESS_FAILED_MESSAGE: &str = "⚠️ Generation failed.";
