pub mod webhook;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use tracing::{error, info};

use crate::base::types::{NotificationPayload, Void};

// Traits.

/// Generic notification sink that announces proactive answers to operators.
#[async_trait]
pub trait GenericNotifier: Send + Sync + 'static {
    /// Send a notification on behalf of `bot`.
    async fn send(&self, bot: &str, payload: &NotificationPayload) -> Void;
}

// Structs.

/// Notification client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct NotifyClient {
    inner: Arc<dyn GenericNotifier>,
}

impl Deref for NotifyClient {
    type Target = dyn GenericNotifier;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl NotifyClient {
    pub fn new(inner: Arc<dyn GenericNotifier>) -> Self {
        Self { inner }
    }

    /// Send a notification, logging any failure instead of returning it.
    pub async fn notify(&self, bot: &str, payload: &NotificationPayload) {
        match self.inner.send(bot, payload).await {
            Ok(()) => info!("Notification sent for message `{}` in chat `{}`.", payload.message_id, payload.chat_id),
            Err(err) => error!("Failed to send notification for message `{}` in chat `{}`: {}", payload.message_id, payload.chat_id, err),
        }
    }
}
