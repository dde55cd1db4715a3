//! Effects produced by state transitions
//!
//! The transition function never touches the ledger; it emits commands the
//! orchestrator executes after adopting the new state.

use super::state::Candidate;
use crate::ledger::{NewObligation, ObligationPatch};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a plain reply
    Reply { text: String },

    /// Send a confirmation prompt with Yes/No choices
    AskConfirmation { text: String },

    /// Send a disambiguation prompt with one choice per candidate
    AskChoice {
        text: String,
        candidates: Vec<Candidate>,
    },

    /// Drop the conversation history window
    ClearHistory,

    /// Mutate the ledger
    Execute { command: LedgerCommand },
}

/// A confirmed, fully-resolved ledger mutation
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCommand {
    /// Create the given obligations; `link_group` ties them together under
    /// one freshly generated group identifier (multi-person split)
    CreateObligations {
        entries: Vec<NewObligation>,
        link_group: bool,
    },

    /// Record a partial payment against one obligation
    RecordPayment {
        obligation_id: Uuid,
        person: String,
        amount: Decimal,
        note: Option<String>,
    },

    /// Close an obligation with a transaction for whatever remains
    SettleFull { obligation_id: Uuid, person: String },

    /// Apply only the supplied fields to one obligation
    EditObligation {
        obligation_id: Uuid,
        person: String,
        patch: ObligationPatch,
    },

    /// Remove one obligation and its transactions permanently
    DeleteObligation { obligation_id: Uuid, person: String },
}

impl Effect {
    pub fn reply(text: impl Into<String>) -> Self {
        Effect::Reply { text: text.into() }
    }

    pub fn ask_confirmation(text: impl Into<String>) -> Self {
        Effect::AskConfirmation { text: text.into() }
    }

    pub fn execute(command: LedgerCommand) -> Self {
        Effect::Execute { command }
    }
}
