//! This module routes an ingested chat message to the right pipeline.

use std::time::Duration;

use tracing::{Instrument, error, info, instrument};

use crate::{
    base::{
        config::Config,
        types::{Message, Void},
    },
    interaction::{message_storage, review},
    pipeline::{Pipelines, proactive::ProactiveOutcome},
    service::{chat::ChatClient, db::DbClient},
};

/// Handles a chat message event.
///
/// The message is stored, then answered reactively when it is addressed to the bot, or
/// handed to the proactive pipeline otherwise.  Published proactive answers are scheduled
/// for review.
#[instrument(skip_all, fields(message_id = %message.id, chat_id = %message.chat_id))]
pub fn handle_chat_event(message: Message, config: Config, db: DbClient, pipelines: Pipelines, chat: ChatClient) {
    tokio::spawn(
        async move {
            // Process the event.
            let result = handle_chat_event_internal(message, &config, &db, &pipelines, &chat).await;

            // Log any errors.
            if let Err(err) = &result {
                error!("Error while handling: {}", err);
            }
        }
        .in_current_span(),
    );
}

#[instrument(skip_all)]
async fn handle_chat_event_internal(message: Message, config: &Config, db: &DbClient, pipelines: &Pipelines, chat: &ChatClient) -> Void {
    message_storage::store_message(&message, db).await?;

    if message.is_mentioned || message.is_private() {
        info!("Answering a message addressed to the bot ...");

        let Some(answer) = pipelines.reactive.answer(&message).await? else {
            info!("No grounded answer; staying silent.");
            return Ok(());
        };

        chat.send_message(&message.chat_id, &message.thread_ts, &answer).await?;

        return Ok(());
    }

    let outcome = pipelines.proactive.run(&message).in_current_span().await;

    if matches!(outcome, ProactiveOutcome::Answered { .. }) && config.review_enabled {
        info!("Scheduling a review in {}s.", config.review_delay_secs);
        review::schedule_review(message.id.clone(), pipelines.review.clone(), Duration::from_secs(config.review_delay_secs));
    }

    Ok(())
}
