//! This module handles the storage of messages in the database.

use tracing::{debug, instrument};

use crate::{
    base::types::{Message, Void},
    service::db::DbClient,
};

/// Stores an ingested message.
///
/// Messages are saved before any pipeline runs, so they are part of the history of the
/// messages that follow them.
#[instrument(skip_all, fields(message_id = %message.id))]
pub async fn store_message(message: &Message, db: &DbClient) -> Void {
    // A message that is already stored may carry a proactive reply; keep it.
    if db.get_message(&message.id).await?.is_some() {
        debug!("Message already stored.");
        return Ok(());
    }

    db.save_message(message).await?;

    debug!("Message stored.");

    Ok(())
}
