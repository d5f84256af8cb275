//! Embedding similarity for answer and query dedup.

use crate::base::types::{AnalysisResult, Message};

/// Maximum cosine similarity between `embedding` and any target, clamped to `[0, 1]`.
///
/// Absent, empty, and differently-sized targets are skipped.  Returns `0.0` when nothing
/// is left to compare against, or when `embedding` has zero norm.
pub fn similarity<T: AsRef<[f32]>>(embedding: &[f32], targets: &[Option<T>]) -> f32 {
    let embedding_norm = norm(embedding);
    if embedding_norm == 0.0 {
        return 0.0;
    }

    targets
        .iter()
        .flatten()
        .map(AsRef::as_ref)
        .filter(|target| !target.is_empty() && target.len() == embedding.len())
        .map(|target| {
            let target_norm = norm(target);
            if target_norm == 0.0 {
                return 0.0;
            }

            let dot = embedding.iter().zip(target).map(|(a, b)| a * b).sum::<f32>();
            (dot / (embedding_norm * target_norm)).clamp(0.0, 1.0)
        })
        .fold(0.0, f32::max)
}

fn norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Whether a similarity marks genuinely new information.
pub fn is_first(similarity: f32, threshold: f32) -> bool {
    similarity < threshold
}

/// Whether a proactive answer should be announced.
///
/// Only answerable results with a non-empty answer that is new to the chat are announced.
pub fn should_notify(analysis: &AnalysisResult, is_first_answer: bool) -> bool {
    is_first_answer && analysis.usable_answer().is_some()
}

/// The prior answer and query embeddings of a set of messages.
pub fn prior_embeddings(messages: &[Message]) -> (Vec<Option<&[f32]>>, Vec<Option<&[f32]>>) {
    let replies = messages.iter().filter_map(|m| m.proactive_reply.as_ref());

    let (answers, queries) = replies.map(|r| (r.answer_embedding.as_deref(), r.query_embedding.as_deref())).unzip();

    (answers, queries)
}

// Tests.
