//! Conversation state types

use crate::intent::ParsedIntent;
use uuid::Uuid;

/// A parsed, not-yet-executed mutation awaiting explicit confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub intent: ParsedIntent,
    /// The confirmation prompt shown when the action was staged
    pub summary: String,
}

/// One selectable record in a disambiguation choice list
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub obligation_id: Uuid,
    pub label: String,
}

/// Conversation state
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ChatState {
    /// Ready for a fresh utterance, nothing staged
    #[default]
    Idle,

    /// A clarifying question is outstanding; the next utterance is
    /// interpreted against the history that includes it
    AwaitingClarification,

    /// A mutation is staged and waiting for Yes / No / a correction
    AwaitingConfirmation { pending: PendingAction },

    /// The confirmed action matched several records; waiting for a pick
    AwaitingDisambiguation {
        pending: PendingAction,
        candidates: Vec<Candidate>,
    },
}

impl ChatState {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ChatState::Idle => "idle",
            ChatState::AwaitingClarification => "awaiting_clarification",
            ChatState::AwaitingConfirmation { .. } => "awaiting_confirmation",
            ChatState::AwaitingDisambiguation { .. } => "awaiting_disambiguation",
        }
    }
}
