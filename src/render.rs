//! User-facing text rendering: rupee formatting and ledger summaries

use crate::ledger::{Direction, Obligation, ObligationKind};
use rust_decimal::Decimal;

/// Format an amount in INR style: `₹5,000` or `₹1,067.50`
pub fn format_inr(amount: Decimal) -> String {
    let rounded = amount.round_dp(2);
    let text = rounded.abs().to_string();
    let (whole, fraction) = match text.split_once('.') {
        Some((w, f)) => (w.to_string(), Some(f.to_string())),
        None => (text, None),
    };

    let mut grouped = String::new();
    for (i, c) in whole.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let grouped: String = grouped.chars().rev().collect();

    let sign = if rounded < Decimal::ZERO { "-" } else { "" };
    match fraction {
        Some(f) if f.trim_end_matches('0').is_empty() => format!("{sign}₹{grouped}"),
        Some(f) => format!("{sign}₹{grouped}.{f:0<2}"),
        None => format!("{sign}₹{grouped}"),
    }
}

/// Summary of pending obligations, one numbered line each
pub fn pending_summary(obligations: &[Obligation]) -> String {
    if obligations.is_empty() {
        return "No pending obligations! You're all clear.".to_string();
    }

    let mut lines = vec!["Pending obligations:".to_string()];
    for (i, ob) in obligations.iter().enumerate() {
        let mut line = format!(
            "{}. {} — {}",
            i + 1,
            ob.person_name,
            format_inr(ob.remaining_amount)
        );
        if ob.kind == ObligationKind::Recurring {
            line.push_str(" (recurring)");
        }
        if ob.direction == Direction::IOwe {
            line.push_str(" (you owe)");
        }
        if let Some(note) = &ob.note {
            line.push_str(&format!(" — {note}"));
        }
        lines.push(line);
    }

    let total: Decimal = obligations.iter().map(|ob| ob.remaining_amount).sum();
    lines.push(format!("Total pending: {}", format_inr(total)));
    lines.join("\n")
}

/// Label for one disambiguation candidate: amount, kind, note
pub fn candidate_label(ob: &Obligation) -> String {
    let mut label = format!(
        "{} remaining ({})",
        format_inr(ob.remaining_amount),
        ob.kind.as_str().replace('_', "-")
    );
    if let Some(note) = &ob.note {
        label.push_str(&format!(" — {note}"));
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{NewObligation, ObligationStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn obligation(person: &str, remaining: i64, note: Option<&str>) -> Obligation {
        let new = NewObligation {
            person_name: person.to_string(),
            kind: ObligationKind::OneTime,
            direction: Direction::OwesMe,
            total_amount: Decimal::from(remaining),
            expected_per_cycle: None,
            note: note.map(String::from),
            group_id: None,
        };
        Obligation {
            id: Uuid::new_v4(),
            group_id: new.group_id,
            person_name: new.person_name,
            kind: new.kind,
            direction: new.direction,
            total_amount: new.total_amount,
            expected_per_cycle: new.expected_per_cycle,
            remaining_amount: Decimal::from(remaining),
            status: ObligationStatus::Active,
            created_at: Utc::now(),
            note: new.note,
            transactions: vec![],
        }
    }

    #[test]
    fn formats_whole_rupees_with_commas() {
        assert_eq!(format_inr(Decimal::from(500)), "₹500");
        assert_eq!(format_inr(Decimal::from(1067)), "₹1,067");
        assert_eq!(format_inr(Decimal::from(3200)), "₹3,200");
        assert_eq!(format_inr(Decimal::from(1_234_567)), "₹1,234,567");
    }

    #[test]
    fn formats_fractions_to_two_places() {
        assert_eq!(format_inr("1067.5".parse::<Decimal>().unwrap()), "₹1,067.50");
        assert_eq!(format_inr("1067.00".parse::<Decimal>().unwrap()), "₹1,067");
    }

    #[test]
    fn summary_lists_and_totals() {
        let obs = vec![
            obligation("Rahul", 1067, Some("Dinner split")),
            obligation("Priya", 1067, None),
        ];
        let summary = pending_summary(&obs);
        assert!(summary.contains("1. Rahul — ₹1,067 — Dinner split"));
        assert!(summary.contains("2. Priya — ₹1,067"));
        assert!(summary.contains("Total pending: ₹2,134"));
    }

    #[test]
    fn empty_summary_is_friendly() {
        assert_eq!(pending_summary(&[]), "No pending obligations! You're all clear.");
    }

    #[test]
    fn candidate_labels_show_amount_kind_note() {
        let ob = obligation("Anjali", 2500, Some("Movie tickets"));
        assert_eq!(candidate_label(&ob), "₹2,500 remaining (one-time) — Movie tickets");
    }
}
