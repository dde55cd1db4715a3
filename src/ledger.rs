//! Ledger store
//!
//! Obligation and transaction records over SQLite. Pure CRUD and query
//! primitives; conversation policy lives in the state machine. Every
//! mutating operation runs inside one SQLite transaction, which gives
//! per-record atomicity and serializes the chat path against the dashboard
//! path.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("obligation not found: {0}")]
    NotFound(Uuid),
    #[error("obligation {0} is already settled")]
    AlreadySettled(Uuid),
    #[error("payment of {amount} exceeds the remaining {remaining}")]
    ExceedsRemaining { amount: Decimal, remaining: Decimal },
    #[error("amount must be positive, got {0}")]
    InvalidAmount(Decimal),
    #[error("remaining amount can only decrease (current {current}, requested {requested})")]
    RemainingIncreased { current: Decimal, requested: Decimal },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

const OBLIGATION_COLUMNS: &str = "id, group_id, person_name, kind, direction, total_amount, \
     expected_per_cycle, remaining_amount, status, created_at, note";

/// Thread-safe ledger handle
#[derive(Clone)]
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerStore {
    /// Open or create the ledger database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory ledger (for testing)
    pub fn open_in_memory() -> LedgerResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> LedgerResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a new obligation; the identifier is assigned here
    pub fn create(&self, new: NewObligation) -> LedgerResult<Obligation> {
        if new.total_amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(new.total_amount));
        }

        let obligation = Obligation {
            id: Uuid::new_v4(),
            group_id: new.group_id,
            person_name: new.person_name,
            kind: new.kind,
            direction: new.direction,
            total_amount: new.total_amount,
            expected_per_cycle: new.expected_per_cycle,
            remaining_amount: new.total_amount,
            status: ObligationStatus::Active,
            created_at: Utc::now(),
            note: new.note,
            transactions: vec![],
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO obligations (id, group_id, person_name, kind, direction, total_amount, \
             expected_per_cycle, remaining_amount, status, created_at, note) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                obligation.id.to_string(),
                obligation.group_id.map(|g| g.to_string()),
                obligation.person_name,
                obligation.kind.as_str(),
                obligation.direction.as_str(),
                obligation.total_amount.to_string(),
                obligation.expected_per_cycle.map(|d| d.to_string()),
                obligation.remaining_amount.to_string(),
                obligation.status.as_str(),
                obligation.created_at.to_rfc3339(),
                obligation.note,
            ],
        )?;

        Ok(obligation)
    }

    /// Get an obligation by id, with its embedded transactions
    pub fn get(&self, id: Uuid) -> LedgerResult<Obligation> {
        let conn = self.conn.lock().unwrap();
        fetch(&conn, id)
    }

    /// List obligations, optionally filtered by status, in creation order
    pub fn list(&self, status: Option<ObligationStatus>) -> LedgerResult<Vec<Obligation>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {OBLIGATION_COLUMNS} FROM obligations {} ORDER BY created_at, id",
            if status.is_some() {
                "WHERE status = ?1"
            } else {
                ""
            }
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = match status {
            Some(s) => stmt.query_map(params![s.as_str()], row_to_obligation)?,
            None => stmt.query_map([], row_to_obligation)?,
        };
        let mut obligations = rows.collect::<Result<Vec<_>, _>>()?;
        for obligation in &mut obligations {
            obligation.transactions = load_transactions(&conn, obligation.id)?;
        }
        Ok(obligations)
    }

    /// Find obligations whose person name contains `name`, case-insensitively
    pub fn find_by_person(
        &self,
        name: &str,
        status: ObligationStatus,
    ) -> LedgerResult<Vec<Obligation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {OBLIGATION_COLUMNS} FROM obligations \
             WHERE LOWER(person_name) LIKE '%' || LOWER(?1) || '%' AND status = ?2 \
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![name, status.as_str()], row_to_obligation)?;
        let mut obligations = rows.collect::<Result<Vec<_>, _>>()?;
        for obligation in &mut obligations {
            obligation.transactions = load_transactions(&conn, obligation.id)?;
        }
        Ok(obligations)
    }

    /// Apply a partial update; only supplied fields are touched.
    ///
    /// Changing the total preserves the amount already paid, so
    /// `remaining = new_total - paid` (floored at zero). The remaining
    /// amount itself may only be adjusted downward.
    pub fn update(&self, id: Uuid, patch: &ObligationPatch) -> LedgerResult<Obligation> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut obligation = fetch(&tx, id)?;

        if let Some(name) = &patch.person_name {
            obligation.person_name = name.clone();
        }
        if let Some(per_cycle) = patch.expected_per_cycle {
            obligation.expected_per_cycle = Some(per_cycle);
        }
        if let Some(note) = &patch.note {
            obligation.note = Some(note.clone());
        }
        if let Some(total) = patch.total_amount {
            if total <= Decimal::ZERO {
                return Err(LedgerError::InvalidAmount(total));
            }
            let paid = obligation.total_amount - obligation.remaining_amount;
            obligation.total_amount = total;
            obligation.remaining_amount = (total - paid).max(Decimal::ZERO);
        } else if let Some(remaining) = patch.remaining_amount {
            if remaining < Decimal::ZERO {
                return Err(LedgerError::InvalidAmount(remaining));
            }
            if remaining > obligation.remaining_amount {
                return Err(LedgerError::RemainingIncreased {
                    current: obligation.remaining_amount,
                    requested: remaining,
                });
            }
            obligation.remaining_amount = remaining;
        }
        if obligation.remaining_amount == Decimal::ZERO {
            obligation.status = ObligationStatus::Settled;
        }

        tx.execute(
            "UPDATE obligations SET person_name = ?2, total_amount = ?3, \
             expected_per_cycle = ?4, remaining_amount = ?5, status = ?6, note = ?7 \
             WHERE id = ?1",
            params![
                id.to_string(),
                obligation.person_name,
                obligation.total_amount.to_string(),
                obligation.expected_per_cycle.map(|d| d.to_string()),
                obligation.remaining_amount.to_string(),
                obligation.status.as_str(),
                obligation.note,
            ],
        )?;
        tx.commit()?;

        Ok(obligation)
    }

    /// Remove an obligation and its embedded transactions permanently
    pub fn delete(&self, id: Uuid) -> LedgerResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM transactions WHERE obligation_id = ?1",
            params![id.to_string()],
        )?;
        let affected = tx.execute("DELETE FROM obligations WHERE id = ?1", params![id.to_string()])?;
        if affected == 0 {
            return Err(LedgerError::NotFound(id));
        }
        tx.commit()?;
        Ok(())
    }

    /// Record a payment against an obligation.
    ///
    /// The amount is capped at the current remaining amount; exceeding it is
    /// an error, never a silent clamp. Reaching zero settles the obligation.
    pub fn append_transaction(
        &self,
        id: Uuid,
        amount: Decimal,
        note: Option<&str>,
    ) -> LedgerResult<Obligation> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut obligation = fetch(&tx, id)?;
        if obligation.status == ObligationStatus::Settled {
            return Err(LedgerError::AlreadySettled(id));
        }
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if amount > obligation.remaining_amount {
            return Err(LedgerError::ExceedsRemaining {
                amount,
                remaining: obligation.remaining_amount,
            });
        }

        let transaction = Transaction {
            amount,
            paid_at: Utc::now(),
            note: note.map(String::from),
        };
        insert_transaction(&tx, id, &transaction)?;

        obligation.remaining_amount -= amount;
        if obligation.remaining_amount == Decimal::ZERO {
            obligation.status = ObligationStatus::Settled;
        }
        tx.execute(
            "UPDATE obligations SET remaining_amount = ?2, status = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                obligation.remaining_amount.to_string(),
                obligation.status.as_str(),
            ],
        )?;
        tx.commit()?;

        obligation.transactions.push(transaction);
        Ok(obligation)
    }

    /// Settle an obligation in full: a closing transaction for whatever
    /// remains, then remaining goes to zero and the record freezes.
    pub fn settle(&self, id: Uuid) -> LedgerResult<Obligation> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut obligation = fetch(&tx, id)?;
        if obligation.status == ObligationStatus::Settled {
            return Err(LedgerError::AlreadySettled(id));
        }

        if obligation.remaining_amount > Decimal::ZERO {
            let closing = Transaction {
                amount: obligation.remaining_amount,
                paid_at: Utc::now(),
                note: Some("Full settlement".to_string()),
            };
            insert_transaction(&tx, id, &closing)?;
            obligation.transactions.push(closing);
        }

        obligation.remaining_amount = Decimal::ZERO;
        obligation.status = ObligationStatus::Settled;
        tx.execute(
            "UPDATE obligations SET remaining_amount = '0', status = 'settled' WHERE id = ?1",
            params![id.to_string()],
        )?;
        tx.commit()?;

        Ok(obligation)
    }
}

fn fetch(conn: &Connection, id: Uuid) -> LedgerResult<Obligation> {
    let mut obligation = conn
        .query_row(
            &format!("SELECT {OBLIGATION_COLUMNS} FROM obligations WHERE id = ?1"),
            params![id.to_string()],
            row_to_obligation,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => LedgerError::NotFound(id),
            other => LedgerError::Sqlite(other),
        })?;
    obligation.transactions = load_transactions(conn, id)?;
    Ok(obligation)
}

fn insert_transaction(
    conn: &Connection,
    obligation_id: Uuid,
    transaction: &Transaction,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO transactions (obligation_id, amount, paid_at, note) VALUES (?1, ?2, ?3, ?4)",
        params![
            obligation_id.to_string(),
            transaction.amount.to_string(),
            transaction.paid_at.to_rfc3339(),
            transaction.note,
        ],
    )?;
    Ok(())
}

fn load_transactions(conn: &Connection, obligation_id: Uuid) -> LedgerResult<Vec<Transaction>> {
    let mut stmt = conn.prepare(
        "SELECT amount, paid_at, note FROM transactions WHERE obligation_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![obligation_id.to_string()], |row| {
        Ok(Transaction {
            amount: column_decimal(row.get::<_, String>(0)?, 0)?,
            paid_at: column_datetime(row.get::<_, String>(1)?, 1)?,
            note: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn row_to_obligation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Obligation> {
    Ok(Obligation {
        id: column_uuid(row.get::<_, String>(0)?, 0)?,
        group_id: row
            .get::<_, Option<String>>(1)?
            .map(|g| column_uuid(g, 1))
            .transpose()?,
        person_name: row.get(2)?,
        kind: ObligationKind::parse(&row.get::<_, String>(3)?)
            .map_err(|e| conversion_failure(3, e))?,
        direction: Direction::parse(&row.get::<_, String>(4)?)
            .map_err(|e| conversion_failure(4, e))?,
        total_amount: column_decimal(row.get::<_, String>(5)?, 5)?,
        expected_per_cycle: row
            .get::<_, Option<String>>(6)?
            .map(|d| column_decimal(d, 6))
            .transpose()?,
        remaining_amount: column_decimal(row.get::<_, String>(7)?, 7)?,
        status: ObligationStatus::parse(&row.get::<_, String>(8)?)
            .map_err(|e| conversion_failure(8, e))?,
        created_at: column_datetime(row.get::<_, String>(9)?, 9)?,
        note: row.get(10)?,
        transactions: vec![],
    })
}

fn column_decimal(text: String, idx: usize) -> rusqlite::Result<Decimal> {
    Decimal::from_str(&text).map_err(|e| conversion_failure(idx, e))
}

fn column_datetime(text: String, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_failure(idx, e))
}

fn column_uuid(text: String, idx: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&text).map_err(|e| conversion_failure(idx, e))
}

fn conversion_failure<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> LedgerStore {
        LedgerStore::open_in_memory().unwrap()
    }

    fn advance(store: &LedgerStore, person: &str, total: i64) -> Obligation {
        store
            .create(NewObligation {
                person_name: person.to_string(),
                kind: ObligationKind::OneTime,
                direction: Direction::OwesMe,
                total_amount: Decimal::from(total),
                expected_per_cycle: None,
                note: None,
                group_id: None,
            })
            .unwrap()
    }

    #[test]
    fn create_starts_active_with_full_remaining() {
        let store = store();
        let ob = advance(&store, "Sunita", 5000);
        assert_eq!(ob.remaining_amount, Decimal::from(5000));
        assert_eq!(ob.status, ObligationStatus::Active);
        assert!(ob.transactions.is_empty());

        let reread = store.get(ob.id).unwrap();
        assert_eq!(reread, ob);
    }

    #[test]
    fn payments_decrement_remaining() {
        let store = store();
        let ob = advance(&store, "Sunita", 5000);

        let ob = store
            .append_transaction(ob.id, Decimal::from(1000), Some("October"))
            .unwrap();
        assert_eq!(ob.remaining_amount, Decimal::from(4000));
        let ob = store
            .append_transaction(ob.id, Decimal::from(1500), None)
            .unwrap();
        assert_eq!(ob.remaining_amount, Decimal::from(2500));
        assert_eq!(ob.status, ObligationStatus::Active);
        assert_eq!(ob.transactions.len(), 2);
    }

    #[test]
    fn overpayment_is_rejected_and_changes_nothing() {
        let store = store();
        let ob = advance(&store, "Rahul", 1067);

        let err = store
            .append_transaction(ob.id, Decimal::from(2000), None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::ExceedsRemaining { .. }));

        let reread = store.get(ob.id).unwrap();
        assert_eq!(reread.remaining_amount, Decimal::from(1067));
        assert!(reread.transactions.is_empty());
    }

    #[test]
    fn exact_payment_settles() {
        let store = store();
        let ob = advance(&store, "Rahul", 500);

        let ob = store
            .append_transaction(ob.id, Decimal::from(500), None)
            .unwrap();
        assert_eq!(ob.remaining_amount, Decimal::ZERO);
        assert_eq!(ob.status, ObligationStatus::Settled);

        // Settled records are frozen
        let err = store
            .append_transaction(ob.id, Decimal::from(1), None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadySettled(_)));
    }

    #[test]
    fn settle_writes_a_closing_transaction() {
        let store = store();
        let ob = advance(&store, "Shivam", 3500);
        store
            .append_transaction(ob.id, Decimal::from(1000), None)
            .unwrap();

        let settled = store.settle(ob.id).unwrap();
        assert_eq!(settled.remaining_amount, Decimal::ZERO);
        assert_eq!(settled.status, ObligationStatus::Settled);
        let closing = settled.transactions.last().unwrap();
        assert_eq!(closing.amount, Decimal::from(2500));
        assert_eq!(closing.note.as_deref(), Some("Full settlement"));

        assert!(matches!(
            store.settle(ob.id).unwrap_err(),
            LedgerError::AlreadySettled(_)
        ));
    }

    #[test]
    fn partial_update_leaves_other_fields_alone() {
        let store = store();
        let ob = advance(&store, "Anita", 5800);

        let updated = store
            .update(
                ob.id,
                &ObligationPatch {
                    note: Some("Phone advance".to_string()),
                    ..ObligationPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.note.as_deref(), Some("Phone advance"));
        assert_eq!(updated.total_amount, Decimal::from(5800));
        assert_eq!(updated.person_name, "Anita");
    }

    #[test]
    fn total_update_preserves_paid_portion() {
        let store = store();
        let ob = advance(&store, "Anita", 5800);
        store
            .append_transaction(ob.id, Decimal::from(2000), None)
            .unwrap();

        let updated = store
            .update(
                ob.id,
                &ObligationPatch {
                    total_amount: Some(Decimal::from(6000)),
                    ..ObligationPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.total_amount, Decimal::from(6000));
        assert_eq!(updated.remaining_amount, Decimal::from(4000));
    }

    #[test]
    fn remaining_can_only_decrease() {
        let store = store();
        let ob = advance(&store, "Anita", 1000);

        let err = store
            .update(
                ob.id,
                &ObligationPatch {
                    remaining_amount: Some(Decimal::from(2000)),
                    ..ObligationPatch::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::RemainingIncreased { .. }));

        let updated = store
            .update(
                ob.id,
                &ObligationPatch {
                    remaining_amount: Some(Decimal::ZERO),
                    ..ObligationPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.status, ObligationStatus::Settled);
    }

    #[test]
    fn person_match_is_case_insensitive_substring() {
        let store = store();
        advance(&store, "Anjali", 1000);
        advance(&store, "Anjali", 2500);
        advance(&store, "Rahul", 500);

        let matches = store.find_by_person("anjali", ObligationStatus::Active).unwrap();
        assert_eq!(matches.len(), 2);
        let matches = store.find_by_person("RAH", ObligationStatus::Active).unwrap();
        assert_eq!(matches.len(), 1);
        assert!(store
            .find_by_person("nobody", ObligationStatus::Active)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn list_filters_by_status() {
        let store = store();
        let a = advance(&store, "A", 100);
        advance(&store, "B", 200);
        store.settle(a.id).unwrap();

        assert_eq!(store.list(None).unwrap().len(), 2);
        assert_eq!(store.list(Some(ObligationStatus::Active)).unwrap().len(), 1);
        assert_eq!(store.list(Some(ObligationStatus::Settled)).unwrap().len(), 1);
    }

    #[test]
    fn delete_removes_record_and_transactions() {
        let store = store();
        let ob = advance(&store, "Rahul", 5000);
        store
            .append_transaction(ob.id, Decimal::from(100), None)
            .unwrap();

        store.delete(ob.id).unwrap();
        assert!(matches!(store.get(ob.id), Err(LedgerError::NotFound(_))));
        assert!(matches!(store.delete(ob.id), Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        let id = {
            let store = LedgerStore::open(&path).unwrap();
            let ob = store
                .create(NewObligation {
                    person_name: "Sunita".to_string(),
                    kind: ObligationKind::Recurring,
                    direction: Direction::OwesMe,
                    total_amount: Decimal::from(5000),
                    expected_per_cycle: Some(Decimal::from(1000)),
                    note: Some("Advance".to_string()),
                    group_id: None,
                })
                .unwrap();
            store
                .append_transaction(ob.id, Decimal::from(1000), None)
                .unwrap();
            ob.id
        };

        let store = LedgerStore::open(&path).unwrap();
        let ob = store.get(id).unwrap();
        assert_eq!(ob.remaining_amount, Decimal::from(4000));
        assert_eq!(ob.expected_per_cycle, Some(Decimal::from(1000)));
        assert_eq!(ob.transactions.len(), 1);
    }
}
