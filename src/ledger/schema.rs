//! Ledger schema and record types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// SQL schema for initialization
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS obligations (
    id TEXT PRIMARY KEY,
    group_id TEXT,
    person_name TEXT NOT NULL,
    kind TEXT NOT NULL,
    direction TEXT NOT NULL,
    total_amount TEXT NOT NULL,
    expected_per_cycle TEXT,
    remaining_amount TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    note TEXT
);

CREATE INDEX IF NOT EXISTS idx_obligations_status ON obligations(status);
CREATE INDEX IF NOT EXISTS idx_obligations_group ON obligations(group_id);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    obligation_id TEXT NOT NULL,
    amount TEXT NOT NULL,
    paid_at TEXT NOT NULL,
    note TEXT,

    FOREIGN KEY (obligation_id) REFERENCES obligations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_transactions_obligation ON transactions(obligation_id, id);
"#;

/// Debt record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationKind {
    Recurring,
    OneTime,
}

impl ObligationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObligationKind::Recurring => "recurring",
            ObligationKind::OneTime => "one_time",
        }
    }

    pub fn parse(value: &str) -> Result<Self, InvalidEnumValue> {
        match value {
            "recurring" => Ok(ObligationKind::Recurring),
            "one_time" => Ok(ObligationKind::OneTime),
            other => Err(InvalidEnumValue::new("kind", other)),
        }
    }
}

/// Which party owes the other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The counterparty owes the user
    #[default]
    OwesMe,
    /// The user owes the counterparty
    IOwe,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::OwesMe => "owes_me",
            Direction::IOwe => "i_owe",
        }
    }

    pub fn parse(value: &str) -> Result<Self, InvalidEnumValue> {
        match value {
            "owes_me" => Ok(Direction::OwesMe),
            "i_owe" => Ok(Direction::IOwe),
            other => Err(InvalidEnumValue::new("direction", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationStatus {
    Active,
    Settled,
}

impl ObligationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ObligationStatus::Active => "active",
            ObligationStatus::Settled => "settled",
        }
    }

    pub fn parse(value: &str) -> Result<Self, InvalidEnumValue> {
        match value {
            "active" => Ok(ObligationStatus::Active),
            "settled" => Ok(ObligationStatus::Settled),
            other => Err(InvalidEnumValue::new("status", other)),
        }
    }
}

/// A stored column held a value outside its enumeration
#[derive(Debug, Error)]
#[error("invalid {field} value in ledger: {value}")]
pub struct InvalidEnumValue {
    field: &'static str,
    value: String,
}

impl InvalidEnumValue {
    fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

/// One recorded payment, embedded in exactly one obligation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
    pub note: Option<String>,
}

/// A single debt record between the user and one named counterparty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: Uuid,
    /// Shared by all obligations created from one multi-person split event
    pub group_id: Option<Uuid>,
    /// Free text; matching is by case-insensitive substring, not identity
    pub person_name: String,
    pub kind: ObligationKind,
    pub direction: Direction,
    pub total_amount: Decimal,
    /// Recurring only; advisory, never enforced
    pub expected_per_cycle: Option<Decimal>,
    pub remaining_amount: Decimal,
    pub status: ObligationStatus,
    pub created_at: DateTime<Utc>,
    pub note: Option<String>,
    pub transactions: Vec<Transaction>,
}

/// Input for creating an obligation
#[derive(Debug, Clone, PartialEq)]
pub struct NewObligation {
    pub person_name: String,
    pub kind: ObligationKind,
    pub direction: Direction,
    pub total_amount: Decimal,
    pub expected_per_cycle: Option<Decimal>,
    pub note: Option<String>,
    pub group_id: Option<Uuid>,
}

/// Partial update; only supplied fields are touched
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ObligationPatch {
    pub person_name: Option<String>,
    pub total_amount: Option<Decimal>,
    pub expected_per_cycle: Option<Decimal>,
    pub remaining_amount: Option<Decimal>,
    pub note: Option<String>,
}

impl ObligationPatch {
    pub fn is_empty(&self) -> bool {
        self.person_name.is_none()
            && self.total_amount.is_none()
            && self.expected_per_cycle.is_none()
            && self.remaining_amount.is_none()
            && self.note.is_none()
    }
}
