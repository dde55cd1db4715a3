//! API request and response types

use crate::ledger::{Direction, ObligationKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One chat turn: free text, or a structured button press, never both
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub conversation_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub signal: Option<ChatSignal>,
}

/// Structured confirmation / disambiguation signals on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatSignal {
    Yes,
    No,
    Cancel,
    Choice { index: usize },
}

/// Request to create an obligation directly (dashboard path)
#[derive(Debug, Deserialize)]
pub struct CreateObligationRequest {
    pub person_name: String,
    pub kind: ObligationKind,
    #[serde(default)]
    pub direction: Direction,
    pub total_amount: Decimal,
    #[serde(default)]
    pub expected_per_cycle: Option<Decimal>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Request to record a payment against an obligation
#[derive(Debug, Deserialize)]
pub struct AddTransactionRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub note: Option<String>,
}

/// Response for delete
#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_signal_wire_format() {
        let yes: ChatSignal = serde_json::from_str(r#"{"kind": "yes"}"#).unwrap();
        assert_eq!(yes, ChatSignal::Yes);
        let pick: ChatSignal = serde_json::from_str(r#"{"kind": "choice", "index": 1}"#).unwrap();
        assert_eq!(pick, ChatSignal::Choice { index: 1 });
    }

    #[test]
    fn chat_request_accepts_text_or_signal() {
        let text: ChatRequest =
            serde_json::from_str(r#"{"conversation_id": "c1", "text": "Rahul paid 500"}"#).unwrap();
        assert!(text.signal.is_none());

        let signal: ChatRequest =
            serde_json::from_str(r#"{"conversation_id": "c1", "signal": {"kind": "no"}}"#).unwrap();
        assert!(signal.text.is_none());
        assert_eq!(signal.signal, Some(ChatSignal::No));
    }
}
