//! Webhook implementation of the notification sink.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument};

use crate::base::{
    config::Config,
    types::{Citation, NotificationPayload, Res, Void},
};

use super::{GenericNotifier, NotifyClient};

const TIMEOUT: Duration = Duration::from_secs(30);

// Extra methods on `NotifyClient` applied by the webhook implementation.

impl NotifyClient {
    pub fn webhook(config: &Config) -> Res<Self> {
        let notifier = WebhookNotifier::new(config.webhook_url.clone())?;
        Ok(Self { inner: Arc::new(notifier) })
    }
}

/// The JSON body posted to the webhook.
#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    bot: &'a str,
    chat_id: &'a str,
    message_id: &'a str,
    question: &'a str,
    answer: &'a str,
    citations: &'a [Citation],
    text: String,
}

impl<'a> WebhookBody<'a> {
    fn new(bot: &'a str, payload: &'a NotificationPayload) -> Self {
        Self {
            bot,
            chat_id: &payload.chat_id,
            message_id: &payload.message_id,
            question: &payload.question,
            answer: &payload.answer,
            citations: &payload.citations,
            text: render_text(bot, payload),
        }
    }
}

/// Render a human-readable summary for chat-style webhooks.
fn render_text(bot: &str, payload: &NotificationPayload) -> String {
    let mut text = format!("[{}] New answer in chat {}\n\nQuestion: {}\n\nAnswer: {}", bot, payload.chat_id, payload.question, payload.answer);

    if !payload.citations.is_empty() {
        text.push_str("\n\nSources:");
        for citation in &payload.citations {
            let label = citation.title.as_deref().or(citation.source.as_deref()).unwrap_or(&citation.knowledge_key);
            text.push_str(&format!("\n- {label}"));
        }
    }

    text
}

// Specific implementations.

/// Webhook notifier implementation.
///
/// When no URL is configured, notifications are only logged.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>) -> Res<Self> {
        let client = Client::builder().timeout(TIMEOUT).build()?;
        let url = url.filter(|u| !u.trim().is_empty());

        Ok(Self { client, url })
    }
}

#[async_trait]
impl GenericNotifier for WebhookNotifier {
    #[instrument(name = "WebhookNotifier::send", skip_all, fields(message_id = %payload.message_id))]
    async fn send(&self, bot: &str, payload: &NotificationPayload) -> Void {
        let Some(url) = &self.url else {
            info!("No webhook configured; skipping notification: {}", render_text(bot, payload));
            return Ok(());
        };

        self.client.post(url).json(&WebhookBody::new(bot, payload)).send().await?.error_for_status()?;

        Ok(())
    }
}

// Tests.
