//! Instruction templates and structured-output schemas for each agent stage.
//!
//! Every template can be overridden from the configuration; these are the defaults.

use std::sync::OnceLock;

use serde_json::{Value, json};

use crate::base::types::Message;

/// Identify stage directive.
pub const IDENTIFY_INSTRUCTION: &str = r#####"
# Identify Directive

You are an AIOps assistant quietly observing a group chat.  Nobody addressed you directly.  Your only job here is to decide whether the _latest_ message is within your responsibility scope.

A message is **within scope** when it is an answerable inquiry about:
  (1) an error, failure, alert, or unexpected behavior of a system or service,
  (2) troubleshooting steps for a problem the author is facing,
  (3) how to perform an operation, configure a component, or use a tool.

A message is **out of scope** when it is not phrased as a question that requires an answer.  For example: greetings, thanks, announcements, status updates, opinions, jokes, or statements that do not ask for anything.

Use the conversation history only to understand the latest message.  Do not judge earlier messages.

## Results

Return _just_ the JSON object described by the response schema:
  - `thinking`: one or two short sentences explaining your decision,
  - `within_scope`: `true` if the latest message is within scope, `false` otherwise.
"#####;

/// Rewrite stage directive.
pub const REWRITE_INSTRUCTION: &str = r#####"
# Rewrite Directive

You turn the latest question of a group chat into self-contained search queries for a knowledge base.

Follow these rules exactly:
  (1) Rewrite _only_ the latest question.  Earlier questions in the history are never rewrite targets, but they may supply entities (product, component, error name) that the latest question leaves implicit.
  (2) Strip everything irrelevant to search: greetings, thanks, filler, emotion, and politeness.
  (3) Exclude non-generalizable identifiers from the rewritten text: customer names, instance IDs, request IDs, log IDs, trace IDs, and timestamps.
  (4) If the latest question contains several independent sub-questions, emit each one as a separate sub-query.  Every sub-query must be a single, self-contained question.
  (5) `overall_query` is one self-contained question that summarizes the whole request.
  (6) If the question truly cannot be made self-contained (critical information is missing and cannot be inferred from the history), return an empty `overall_query` and an empty `sub_queries` list.

## Results

Return _just_ the JSON object described by the response schema.
"#####;

/// Analysis stage directive.
pub const ANALYSIS_INSTRUCTION: &str = r#####"
# Analysis Directive

You decide whether a question can be answered from the numbered knowledge citations you are given, and if so, you answer it.

A citation is usable _only_ if all of the following hold:
  (1) the object (product, component, service) matches the question,
  (2) the symptom (error, behavior) matches the question,
  (3) the precondition (environment, version, operation) matches the question,
  (4) the citation yields an unambiguous conclusion.  Citations that only say "investigate further" or "needs escalation" are not usable.

When answering:
  - never ask the user for more information,
  - never reveal sensitive data (credentials, internal hosts, personal data),
  - never suggest escalating or contacting a person,
  - never use heading-level formatting; use short paragraphs and lists,
  - answer only from the usable citations; do not use outside knowledge.

## Results

Return _just_ the JSON object described by the response schema:
  - `thinking`: a short explanation of which citations match and why,
  - `is_answerable`: `true` only if at least one usable citation answers the question,
  - `answer`: the answer when answerable, otherwise `null`,
  - `citations`: the 1-based numbers of the citations you used, otherwise `null`.
"#####;

/// Review stage directive.
pub const REVIEW_INSTRUCTION: &str = r#####"
# Review Directive

Some time ago you proactively answered a question in a group chat.  You are now given the original question, your original answer, the conversation _before_ the question, and the conversation _after_ it.

Decide what should happen to your answer:
  - `pending`: the later conversation does not say anything new about the question,
  - `keep`: the later conversation confirms the answer was correct,
  - `modify`: the later conversation shows the correct answer differs from yours.  Provide a self-contained `question` and the corrected `answer`, both free of customer names and identifiers,
  - `delete`: the later conversation shows the answer was wrong and the knowledge it was based on is wrong.  List the knowledge keys of the wrong citations in `delete_citation_ids`.

Only use information that is explicitly stated in the conversation.

## Results

Return _just_ the JSON object described by the response schema.  Fields that do not apply to the chosen action must be `null`.
"#####;

/// Reactive answer addendum, appended to the analysis directive when the bot is addressed directly.
pub const REACTIVE_ADDENDUM: &str = r#####"
# Mention Addendum

The user addressed you directly.  The question is directed at you.  The same rules apply: if the citations do not answer the question, mark it as not answerable.
"#####;

// Schemas.

static IDENTIFY_SCHEMA: OnceLock<Value> = OnceLock::new();
static REWRITE_SCHEMA: OnceLock<Value> = OnceLock::new();
static ANALYSIS_SCHEMA: OnceLock<Value> = OnceLock::new();
static REVIEW_SCHEMA: OnceLock<Value> = OnceLock::new();

/// Get the identify stage output schema.
pub fn identify_schema() -> &'static Value {
    IDENTIFY_SCHEMA.get_or_init(|| {
        json!({
            "type": "object",
            "properties": {
                "thinking": { "type": "string" },
                "within_scope": { "type": "boolean" }
            },
            "required": ["thinking", "within_scope"],
            "additionalProperties": false
        })
    })
}

/// Get the rewrite stage output schema.
pub fn rewrite_schema() -> &'static Value {
    REWRITE_SCHEMA.get_or_init(|| {
        json!({
            "type": "object",
            "properties": {
                "overall_query": { "type": "string" },
                "sub_queries": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["overall_query", "sub_queries"],
            "additionalProperties": false
        })
    })
}

/// Get the analysis stage output schema.
pub fn analysis_schema() -> &'static Value {
    ANALYSIS_SCHEMA.get_or_init(|| {
        json!({
            "type": "object",
            "properties": {
                "thinking": { "type": "string" },
                "is_answerable": { "type": "boolean" },
                "answer": { "type": ["string", "null"] },
                "citations": { "type": ["array", "null"], "items": { "type": "integer" } }
            },
            "required": ["thinking", "is_answerable", "answer", "citations"],
            "additionalProperties": false
        })
    })
}

/// Get the review stage output schema.
pub fn review_schema() -> &'static Value {
    REVIEW_SCHEMA.get_or_init(|| {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["pending", "keep", "delete", "modify"] },
                "question": { "type": ["string", "null"] },
                "answer": { "type": ["string", "null"] },
                "delete_citation_ids": { "type": ["array", "null"], "items": { "type": "string" } }
            },
            "required": ["action", "question", "answer", "delete_citation_ids"],
            "additionalProperties": false
        })
    })
}

// Formatting.

/// Format chat messages as a plain transcript, oldest first.
pub fn format_history(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "(no messages)".to_string();
    }

    messages
        .iter()
        .map(|m| format!("[{}] {}: {}", m.timestamp.format("%Y-%m-%d %H:%M:%S"), m.sender, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

// Tests.
