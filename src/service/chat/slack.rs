//! Slack implementation of the chat service.
//!
//! The bot listens over socket mode.  Every human message event is converted into a
//! [`Message`] and handed to the interaction layer; app mention events are ignored, since
//! Slack delivers the same text as a message event (whose mentions are parsed here).

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use slack_morphism::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{ChatType, ContentPart, Message, Res, Void},
    },
    interaction,
    pipeline::Pipelines,
    service::db::DbClient,
};

use super::{ChatClient, GenericChatClient};

// Type aliases.

type FullClient = slack_morphism::SlackClient<SlackClientHyperConnector<HttpsConnector<HttpConnector>>>;

/// The `channel` value of messages ingested from Slack.
const CHANNEL: &str = "slack";

// Extra methods on `ChatClient` applied by the slack implementation.

impl ChatClient {
    /// Creates a new Slack chat client.
    pub async fn slack(config: &Config, db: DbClient, pipelines: Pipelines) -> Res<Self> {
        let client = SlackChatClient::new(config, db, pipelines).await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

impl From<SlackChatClient> for ChatClient {
    fn from(client: SlackChatClient) -> Self {
        Self { inner: Arc::new(client) }
    }
}

// Structs.

/// User state for the slack socket client.
struct SlackUserState {
    config: Config,
    db: DbClient,
    pipelines: Pipelines,
    chat: ChatClient,
    bot_user_id: String,
}

/// Slack client implementation.
#[derive(Clone)]
struct SlackChatClient {
    pub app_token: SlackApiToken,
    pub bot_token: SlackApiToken,
    pub bot_user_id: String,
    pub client: Arc<FullClient>,
    pub config: Config,
    pub db: DbClient,
    pub pipelines: Pipelines,
}

impl Deref for SlackChatClient {
    type Target = FullClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl SlackChatClient {
    /// Create a new Slack chat client.
    #[instrument(name = "SlackChatClient::new", skip_all)]
    pub async fn new(config: &Config, db: DbClient, pipelines: Pipelines) -> Res<Self> {
        // Initialize tokens.

        let app_token = SlackApiToken::new(SlackApiTokenValue(config.slack_app_token.clone()));
        let bot_token = SlackApiToken::new(SlackApiTokenValue(config.slack_bot_token.clone()));

        // Initialize the Slack client.

        let https_connector = HttpsConnector::<HttpConnector>::builder().with_native_roots()?.https_only().enable_all_versions().build();
        let connector = SlackClientHyperConnector::with_connector(https_connector);
        let client = Arc::new(slack_morphism::SlackClient::new(connector));

        // Get the bot's user ID.

        let session = client.open_session(&bot_token);
        let bot_user = session.auth_test().await?;
        let bot_user_id = bot_user.user_id.0;

        info!("Slack bot user ID: {}", bot_user_id);

        Ok(Self {
            app_token,
            bot_token,
            bot_user_id,
            client,
            config: config.clone(),
            db,
            pipelines,
        })
    }
}

#[async_trait]
impl GenericChatClient for SlackChatClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn start(&self) -> Void {
        // Initialize the socket mode listener.

        let socket_mode_callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);

        // Initialize the socket mode listener environment.

        let listener_environment = Arc::new(SlackClientEventsListenerEnvironment::new(self.client.clone()).with_user_state(SlackUserState {
            config: self.config.clone(),
            db: self.db.clone(),
            pipelines: self.pipelines.clone(),
            chat: ChatClient::from(self.clone()),
            bot_user_id: self.bot_user_id.clone(),
        }));

        let socket_mode_listener = Arc::new(SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            listener_environment.clone(),
            socket_mode_callbacks,
        ));

        // Register an app token to listen for events.
        socket_mode_listener.listen_for(&self.app_token).await?;

        // Serve until Ctrl-C.
        socket_mode_listener.serve().await;

        Ok(())
    }

    #[instrument(skip(self, text))]
    async fn send_message(&self, channel_id: &str, thread_ts: &str, text: &str) -> Void {
        let message = SlackMessageContent::new().with_text(text.to_string());

        let request = SlackApiChatPostMessageRequest::new(SlackChannelId(channel_id.to_string()), message)
            .with_as_user(true)
            .with_thread_ts(SlackTs(thread_ts.to_string()))
            .with_link_names(true);

        let session = self.client.open_session(&self.bot_token);

        let _ = session.chat_post_message(&request).await.map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))?;

        Ok(())
    }
}

// Message conversion.

/// The platform-neutral parts of an incoming Slack message.
#[derive(Debug, Clone)]
struct IncomingMessage<'a> {
    channel_id: &'a str,
    channel_type: Option<&'a str>,
    ts: &'a str,
    thread_ts: Option<&'a str>,
    sender: &'a str,
    text: &'a str,
}

impl IncomingMessage<'_> {
    /// Convert into a [`Message`], as seen by the bot `bot_user_id`.
    fn into_message(self, bot_user_id: &str) -> Res<Message> {
        let timestamp = parse_ts(self.ts)?;
        let chat_type = if self.channel_type == Some("im") { ChatType::Private } else { ChatType::Group };
        let mentions = parse_mentions(self.text);
        let is_mentioned = chat_type == ChatType::Private || mentions.iter().any(|m| m == bot_user_id);

        Ok(Message {
            id: format!("{}-{}", self.channel_id, self.ts),
            chat_id: self.channel_id.to_string(),
            chat_type,
            sender: self.sender.to_string(),
            channel: CHANNEL.to_string(),
            thread_ts: self.thread_ts.unwrap_or(self.ts).to_string(),
            timestamp,
            content: self.text.to_string(),
            parts: vec![ContentPart::Text { text: self.text.to_string() }],
            mentions,
            is_mentioned,
            proactive_reply: None,
        })
    }
}

/// Parse a Slack timestamp (`seconds.micros`) into a UTC time.
fn parse_ts(ts: &str) -> Res<DateTime<Utc>> {
    let (secs, micros) = ts.split_once('.').unwrap_or((ts, "0"));

    let secs = secs.parse::<i64>()?;
    let micros = format!("{micros:0<6}").get(..6).unwrap_or("0").parse::<u32>()?;

    DateTime::from_timestamp(secs, micros * 1_000).ok_or_else(|| anyhow::anyhow!("Invalid Slack timestamp `{}`.", ts))
}

/// Extract the user IDs of `<@U…>` (or `<@U…|name>`) mentions, in order, without repeats.
fn parse_mentions(text: &str) -> Vec<String> {
    let mut mentions = Vec::new();

    for token in text.split("<@").skip(1) {
        let Some(end) = token.find('>') else {
            continue;
        };

        let user = token[..end].split('|').next().unwrap_or_default().trim();
        if !user.is_empty() && !mentions.iter().any(|m| m == user) {
            mentions.push(user.to_string());
        }
    }

    mentions
}

// Socket mode listener callbacks for Slack.

/// Handles push events from Slack.
#[instrument(skip_all)]
async fn handle_push_event(event_callback: SlackPushEventCallback, _client: Arc<SlackHyperClient>, states: SlackClientEventsUserState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let event = event_callback.event;
    let states = states.read().await;
    let user_state = states.get_user_state::<SlackUserState>().ok_or(anyhow::anyhow!("Failed to get user state"))?;

    match event {
        SlackEventCallbackBody::Message(event) => {
            // Edits, joins, and other subtypes are not questions.
            if event.subtype.is_some() || event.sender.bot_id.is_some() {
                debug!("Skipping message event with a subtype or from a bot.");
                return Ok(());
            }

            let Some(sender) = event.sender.user.as_ref().map(|u| u.0.as_str()) else {
                debug!("Skipping message event without a sender.");
                return Ok(());
            };

            if sender == user_state.bot_user_id {
                debug!("Skipping the bot's own message.");
                return Ok(());
            }

            let channel_id = event.origin.channel.as_ref().ok_or(anyhow::anyhow!("Failed to get channel ID"))?;
            let text = event.content.as_ref().and_then(|c| c.text.as_deref()).unwrap_or_default();

            let incoming = IncomingMessage {
                channel_id: &channel_id.0,
                channel_type: event.origin.channel_type.as_ref().map(|t| t.0.as_str()),
                ts: &event.origin.ts.0,
                thread_ts: event.origin.thread_ts.as_ref().map(|t| t.0.as_str()),
                sender,
                text,
            };

            let message = incoming.into_message(&user_state.bot_user_id)?;

            info!("Received message `{}` ...", message.id);

            interaction::chat_event::handle_chat_event(
                message,
                user_state.config.clone(),
                user_state.db.clone(),
                user_state.pipelines.clone(),
                user_state.chat.clone(),
            );
        }
        SlackEventCallbackBody::AppMention(_) => {
            debug!("Ignoring app mention event; handled through its message event.");
        }
        _ => {
            warn!("Received unhandled push event.")
        }
    }

    Ok(())
}

// Tests.
