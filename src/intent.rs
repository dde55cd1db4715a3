//! Intent extraction
//!
//! Sends one utterance plus running context to the language model and
//! validates the untrusted response into a closed `ParsedIntent` schema.
//! Anything that does not conform — malformed JSON, an unknown action,
//! a negative amount, a transport failure — is a `ParseFailure`; there is
//! no default intent and nothing executes on a failed parse.

mod prompts;

use crate::ledger::{Direction, Obligation, ObligationKind};
use crate::llm::{ChatMessage, CompletionRequest, LlmError, LlmService};
use crate::session::HistoryTurn;
use prompts::SYSTEM_PROMPT;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Near-deterministic classification
const TEMPERATURE: f32 = 0.1;

/// What the user wants done, as extracted by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentAction {
    Add,
    Settle,
    Query,
    Edit,
    Delete,
    Chitchat,
    OffTopic,
}

impl IntentAction {
    /// Actions that mutate the ledger and therefore require the
    /// confirm-before-mutate path
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            IntentAction::Add | IntentAction::Settle | IntentAction::Edit | IntentAction::Delete
        )
    }
}

/// Structured intent for one turn. Ephemeral: consumed within the turn or
/// held in session state pending confirmation, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub action: IntentAction,
    #[serde(default)]
    pub persons: Vec<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default, rename = "obligation_type")]
    pub kind: Option<ObligationKind>,
    #[serde(default)]
    pub expected_per_cycle: Option<Decimal>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub is_ambiguous: bool,
    #[serde(default)]
    pub clarifying_question: Option<String>,
}

/// Full extractor output: the structured intent plus the human-readable
/// confirmation string and the model's confirmation flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorReply {
    #[serde(default)]
    pub parsed: Option<ParsedIntent>,
    pub confirmation_message: String,
    #[serde(default = "default_true")]
    pub requires_confirmation: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum ParseFailure {
    #[error("language model request failed: {0}")]
    Llm(#[from] LlmError),
    #[error("model response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("model response failed validation: {0}")]
    Invalid(String),
}

/// Turns utterances into validated intents
pub struct IntentExtractor {
    service: Arc<dyn LlmService>,
}

impl IntentExtractor {
    pub fn new(service: Arc<dyn LlmService>) -> Self {
        Self { service }
    }

    /// Extract a structured intent from one utterance.
    ///
    /// `snapshot` is the active-obligation context serialized into the
    /// request so the model can resolve references like "Rahul's entry";
    /// `history` is the bounded recent-turn window.
    pub async fn extract(
        &self,
        utterance: &str,
        snapshot: &[Obligation],
        history: &[HistoryTurn],
    ) -> Result<ExtractorReply, ParseFailure> {
        let request = build_request(utterance, snapshot, history);
        let raw = self.service.complete(&request).await?;
        let stripped = strip_code_fences(&raw);

        tracing::debug!(raw = %stripped, "LLM intent response");

        let reply: ExtractorReply = serde_json::from_str(&stripped)?;
        validate(reply)
    }
}

fn build_request(
    utterance: &str,
    snapshot: &[Obligation],
    history: &[HistoryTurn],
) -> CompletionRequest {
    let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];

    if !snapshot.is_empty() {
        messages.push(ChatMessage::system(snapshot_context(snapshot)));
    }
    for turn in history {
        messages.push(ChatMessage::user(&*turn.utterance));
        messages.push(ChatMessage::assistant(&*turn.response));
    }
    messages.push(ChatMessage::user(utterance));

    CompletionRequest {
        messages,
        temperature: TEMPERATURE,
    }
}

/// Serialize the active obligations the way the rule text expects them
fn snapshot_context(snapshot: &[Obligation]) -> String {
    let mut context = String::from("Active obligations:\n");
    for ob in snapshot {
        context.push_str(&format!(
            "- {}: ₹{} remaining ({}, total ₹{})",
            ob.person_name,
            ob.remaining_amount,
            ob.kind.as_str(),
            ob.total_amount,
        ));
        if let Some(note) = &ob.note {
            context.push_str(&format!(" — {note}"));
        }
        context.push('\n');
    }
    context
}

/// Models occasionally wrap the JSON in markdown fences despite the rules
fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    trimmed
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Mechanical checks on a schema-conforming reply
fn validate(mut reply: ExtractorReply) -> Result<ExtractorReply, ParseFailure> {
    if let Some(parsed) = &mut reply.parsed {
        if let Some(amount) = parsed.amount {
            if amount < Decimal::ZERO {
                return Err(ParseFailure::Invalid(format!("negative amount: {amount}")));
            }
        }
        if let Some(per_cycle) = parsed.expected_per_cycle {
            if per_cycle < Decimal::ZERO {
                return Err(ParseFailure::Invalid(format!(
                    "negative expected_per_cycle: {per_cycle}"
                )));
            }
        }
        parsed.persons = parsed
            .persons
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }
    if reply.confirmation_message.trim().is_empty() {
        return Err(ParseFailure::Invalid(
            "empty confirmation_message".to_string(),
        ));
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_a_full_reply() {
        let raw = r#"{
            "parsed": {
                "action": "add",
                "persons": ["Sunita"],
                "direction": "owes_me",
                "amount": 5000,
                "obligation_type": "recurring",
                "expected_per_cycle": 1000,
                "note": "Advance",
                "is_ambiguous": false,
                "clarifying_question": null
            },
            "confirmation_message": "Add Sunita's advance?",
            "requires_confirmation": true
        }"#;

        let reply: ExtractorReply = serde_json::from_str(raw).unwrap();
        let parsed = reply.parsed.unwrap();
        assert_eq!(parsed.action, IntentAction::Add);
        assert_eq!(parsed.amount, Some(Decimal::from(5000)));
        assert_eq!(parsed.kind, Some(ObligationKind::Recurring));
        assert_eq!(parsed.direction, Direction::OwesMe);
    }

    #[test]
    fn unknown_action_fails_closed() {
        let raw = r#"{
            "parsed": {"action": "transfer", "persons": []},
            "confirmation_message": "ok"
        }"#;
        assert!(serde_json::from_str::<ExtractorReply>(raw).is_err());
    }

    #[test]
    fn strips_markdown_fences() {
        let fenced = "```json\n{\"confirmation_message\": \"hi\"}\n```";
        assert_eq!(
            strip_code_fences(fenced),
            "{\"confirmation_message\": \"hi\"}"
        );
        let bare = "{\"confirmation_message\": \"hi\"}";
        assert_eq!(strip_code_fences(bare), bare);
    }

    #[test]
    fn rejects_negative_amounts() {
        let reply = ExtractorReply {
            parsed: Some(ParsedIntent {
                action: IntentAction::Settle,
                persons: vec!["Rahul".to_string()],
                direction: Direction::OwesMe,
                amount: Some(Decimal::from(-500)),
                kind: None,
                expected_per_cycle: None,
                note: None,
                is_ambiguous: false,
                clarifying_question: None,
            }),
            confirmation_message: "ok".to_string(),
            requires_confirmation: true,
        };
        assert!(matches!(validate(reply), Err(ParseFailure::Invalid(_))));
    }

    #[test]
    fn drops_blank_person_entries() {
        let reply = ExtractorReply {
            parsed: Some(ParsedIntent {
                action: IntentAction::Add,
                persons: vec![" Rahul ".to_string(), "  ".to_string()],
                direction: Direction::OwesMe,
                amount: Some(Decimal::from(100)),
                kind: None,
                expected_per_cycle: None,
                note: None,
                is_ambiguous: false,
                clarifying_question: None,
            }),
            confirmation_message: "ok".to_string(),
            requires_confirmation: true,
        };
        let validated = validate(reply).unwrap();
        assert_eq!(validated.parsed.unwrap().persons, vec!["Rahul"]);
    }

    #[test]
    fn missing_parsed_defaults_to_none() {
        let raw = r#"{"confirmation_message": "Could not follow that."}"#;
        let reply: ExtractorReply = serde_json::from_str(raw).unwrap();
        assert!(reply.parsed.is_none());
        assert!(reply.requires_confirmation);
    }
}
