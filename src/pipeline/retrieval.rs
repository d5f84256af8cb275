//! Knowledge retrieval fan-out.
//!
//! Every (query, collection) pair is searched concurrently.  Each branch yields its own
//! result; failed branches are logged and left out, so one failing search never cancels or
//! fails its siblings.

use std::collections::HashSet;

use chrono::DateTime;
use tracing::{info, instrument, warn};

use crate::{
    base::types::{Citation, CitationType, KnowledgeHit, Res},
    service::knowledge::KnowledgeClient,
};

/// Search every collection for every query, and merge the hits into citations.
///
/// Citations keep the order of the tasks that produced them (queries first, then collections),
/// and the order of hits within a task.  A knowledge key already produced by an earlier task is
/// not repeated.
#[instrument(skip_all, fields(queries = queries.len(), collections = collections.len()))]
pub async fn retrieve(kb: &KnowledgeClient, collections: &[String], queries: &[String], top_k: u32) -> Vec<Citation> {
    let tasks = queries
        .iter()
        .flat_map(|query| collections.iter().map(move |collection| (query.as_str(), collection.as_str())))
        .map(|(query, collection)| async move {
            let result = kb.search(collection, query, top_k).await;
            (query, collection, result)
        })
        .collect::<Vec<_>>();

    let task_count = tasks.len();
    let results = futures::future::join_all(tasks).await;

    let citations = merge_results(results);

    info!("Retrieved {} citations from {} searches.", citations.len(), task_count);

    citations
}

/// Merge per-task results into one citation list, dropping failed tasks.
fn merge_results<'a>(results: Vec<(&'a str, &'a str, Res<Vec<KnowledgeHit>>)>) -> Vec<Citation> {
    let mut seen = HashSet::new();
    let mut citations = Vec::new();
    let mut failed = 0;

    for (query, collection, result) in results {
        match result {
            Ok(hits) => {
                for hit in hits {
                    if seen.insert(hit.key.clone()) {
                        citations.push(hit.into_citation(collection));
                    }
                }
            }
            Err(err) => {
                failed += 1;
                warn!("Knowledge search failed for query `{}` in collection `{}`: {}", query, collection, err);
            }
        }
    }

    if failed > 0 {
        warn!("{} knowledge searches failed; continuing with partial results.", failed);
    }

    citations
}

/// Format citations for an agent prompt, numbered from 1.
pub fn format_citations(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return "(no citations)".to_string();
    }

    citations
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let updated = DateTime::from_timestamp(c.updated_at, 0).map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string()).unwrap_or_else(|| "unknown".to_string());

            let header = match (c.citation_type, &c.title) {
                (CitationType::Document, Some(title)) => format!("[{}] (Document) Title: {} | Updated: {}", i + 1, title, updated),
                (CitationType::Document, None) => format!("[{}] (Document) Updated: {}", i + 1, updated),
                (CitationType::Qa, _) => format!("[{}] (QA) Updated: {}", i + 1, updated),
            };

            format!("{}\n{}", header, c.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Select the citations referenced by 1-based indices.
///
/// Indices outside `[1, N]` and repeated indices are dropped.
pub fn select_citations(citations: &[Citation], indices: &[i64]) -> Vec<Citation> {
    let mut seen = HashSet::new();

    indices
        .iter()
        .filter(|&&i| i >= 1 && (i as usize) <= citations.len())
        .filter(|&&i| seen.insert(i))
        .map(|&i| citations[i as usize - 1].clone())
        .collect()
}

// Tests.
