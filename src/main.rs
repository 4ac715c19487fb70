use std::error::Error;
use std::sync::Arc;

use dotenvy::dotenv;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::update_listeners::Polling;
use teloxide::utils::command::BotCommands;
use tracing::{debug, info};

mod config;
mod dispatch;
mod gate;
mod handlers;
mod orchestrator;
mod platform;
mod session;
mod state;
#[cfg(test)]
mod testing;
mod utils;

use config::Config;
use dispatch::{DispatchPool, WebhookClient};
use handlers::{callbacks, commands, messages};
use platform::TelegramPlatform;
use state::AppState;
use utils::logging::init_logging;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Help,
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            return Err(err.into());
        }
    };
    let _guards = init_logging(&config.log_level);
    config.log_warnings();

    info!("Initializing portrait bot");

    let bot = Bot::new(config.bot_token.clone());
    let backend = WebhookClient::new(config.n8n_webhook_url.clone(), config.request_timeout)?;
    let pool = Arc::new(DispatchPool::start(config.worker_pool_size, Arc::new(backend)));
    info!("Dispatch pool size: {} workers", pool.size());
    let platform = Arc::new(TelegramPlatform::new(bot.clone()));
    let state = AppState::new(platform, pool.clone());

    let command_handler = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(
            dptree::filter(|msg: Message| msg.photo().is_some()).endpoint(handle_photo_message),
        )
        .branch(
            dptree::filter(|msg: Message| msg.document().is_some())
                .endpoint(handle_document_message),
        )
        .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text_message))
        .endpoint(ignore_message);

    let callback_handler = Update::filter_callback_query().endpoint(handle_callback_query);

    let handler = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler);

    // Photos sent while the bot was down are skipped rather than replayed.
    let listener = Polling::builder(bot.clone())
        .drop_pending_updates()
        .build();

    info!("Bot started; each user is limited to one active request at a time");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state.clone()])
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("An error from the update listener"),
        )
        .await;

    info!(
        "Dispatcher stopped, draining {} background tasks",
        state.orchestrator.in_flight()
    );
    state.orchestrator.shutdown(config.shutdown_grace).await;
    pool.shutdown(config.shutdown_grace).await;
    info!(
        "Gate state at exit: {} busy, {} released",
        state.gate.busy_count(),
        state.gate.released_total()
    );
    info!("Bot stopped");

    Ok(())
}

fn sender_id(message: &Message) -> Option<i64> {
    message
        .from
        .as_ref()
        .and_then(|user| i64::try_from(user.id.0).ok())
}

async fn handle_command(state: AppState, message: Message, command: Command) -> HandlerResult {
    let chat_id = message.chat.id.0;
    match command {
        Command::Start => {
            let Some(user_id) = sender_id(&message) else {
                return Ok(());
            };
            commands::start_handler(&state, user_id, chat_id).await;
        }
        Command::Help => commands::help_handler(&state, chat_id).await,
    }
    Ok(())
}

async fn handle_photo_message(state: AppState, message: Message) -> HandlerResult {
    let Some(user_id) = sender_id(&message) else {
        return Ok(());
    };
    let Some(photo) = message.photo().and_then(|sizes| sizes.last()) else {
        return Ok(());
    };

    // The background unit is detached here; the handler returns right away.
    match messages::handle_photo(&state, user_id, message.chat.id.0, &photo.file.id.0).await {
        messages::PhotoAdmission::Accepted(unit) => {
            debug!(
                "Handler for user {user_id} returned; background unit finished: {}",
                unit.is_finished()
            );
        }
        messages::PhotoAdmission::Busy | messages::PhotoAdmission::Unavailable => {}
    }
    Ok(())
}

async fn handle_document_message(state: AppState, message: Message) -> HandlerResult {
    if sender_id(&message).is_none() {
        return Ok(());
    }
    let mime_type = message
        .document()
        .and_then(|document| document.mime_type.as_ref())
        .map(|mime| mime.essence_str().to_string());
    messages::handle_document(&state, message.chat.id.0, mime_type.as_deref()).await;
    Ok(())
}

async fn handle_text_message(state: AppState, message: Message) -> HandlerResult {
    if sender_id(&message).is_none() {
        return Ok(());
    }
    if let Some(text) = message.text() {
        if text.trim_start().starts_with('/') {
            return Ok(());
        }
    }
    messages::handle_text(&state, message.chat.id.0).await;
    Ok(())
}

async fn handle_callback_query(state: AppState, query: CallbackQuery) -> HandlerResult {
    callbacks::handle_callback(&state, &query.id.0).await;
    Ok(())
}

async fn ignore_message(_message: Message) -> HandlerResult {
    Ok(())
}
