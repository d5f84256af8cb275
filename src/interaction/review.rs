//! This module schedules the delayed review of proactive answers.

use std::time::Duration;

use tracing::{Instrument, error, info, instrument};

use crate::pipeline::review::ReviewPipeline;

/// Schedules a review of the proactive answer of `message_id` after `delay`.
///
/// The review runs in its own task, so the caller is never blocked by the delay.
#[instrument(skip(review))]
pub fn schedule_review(message_id: String, review: ReviewPipeline, delay: Duration) {
    tokio::spawn(
        async move {
            tokio::time::sleep(delay).await;

            // Process the review.
            let result = review.run(&message_id).await;

            // Log the outcome.
            match result {
                Ok(outcome) => info!("Review of `{}` finished with {:?}.", message_id, outcome),
                Err(err) => error!("Error while reviewing `{}`: {}", message_id, err),
            }
        }
        .in_current_span(),
    );
}
