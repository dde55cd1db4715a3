//! Property-based tests for the conversation state machine
//!
//! These verify the confirm-before-mutate invariants across all inputs.

use super::state::*;
use super::transition::*;
use super::*;
use crate::intent::{ExtractorReply, IntentAction, ParsedIntent};
use crate::ledger::{Direction, Obligation, ObligationKind, ObligationStatus};
use crate::split::split_shares;
use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

// ============================================================================
// Test Helpers
// ============================================================================

fn obligation(person: &str, remaining: i64) -> Obligation {
    Obligation {
        id: Uuid::new_v4(),
        group_id: None,
        person_name: person.to_string(),
        kind: ObligationKind::OneTime,
        direction: Direction::OwesMe,
        total_amount: Decimal::from(remaining),
        expected_per_cycle: None,
        remaining_amount: Decimal::from(remaining),
        status: ObligationStatus::Active,
        created_at: Utc::now(),
        note: None,
        transactions: vec![],
    }
}

fn intent(action: IntentAction, persons: &[&str], amount: Option<i64>) -> ParsedIntent {
    ParsedIntent {
        action,
        persons: persons.iter().map(|p| (*p).to_string()).collect(),
        direction: Direction::OwesMe,
        amount: amount.map(Decimal::from),
        kind: None,
        expected_per_cycle: None,
        note: None,
        is_ambiguous: false,
        clarifying_question: None,
    }
}

fn reply_for(parsed: ParsedIntent) -> ExtractorReply {
    ExtractorReply {
        parsed: Some(parsed),
        confirmation_message: "Should I log this?".to_string(),
        requires_confirmation: true,
    }
}

fn pending_for(parsed: ParsedIntent) -> PendingAction {
    PendingAction {
        intent: parsed,
        summary: "Should I log this?".to_string(),
    }
}

fn has_execute(effects: &[Effect]) -> bool {
    effects.iter().any(|e| matches!(e, Effect::Execute { .. }))
}

fn find_command(effects: &[Effect]) -> Option<&LedgerCommand> {
    effects.iter().find_map(|e| match e {
        Effect::Execute { command } => Some(command),
        _ => None,
    })
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_mutating_action() -> impl Strategy<Value = IntentAction> {
    prop_oneof![
        Just(IntentAction::Add),
        Just(IntentAction::Settle),
        Just(IntentAction::Edit),
        Just(IntentAction::Delete),
    ]
}

fn arb_target_action() -> impl Strategy<Value = IntentAction> {
    prop_oneof![
        Just(IntentAction::Settle),
        Just(IntentAction::Edit),
        Just(IntentAction::Delete),
    ]
}

fn arb_intent() -> impl Strategy<Value = ParsedIntent> {
    (
        arb_mutating_action(),
        proptest::collection::vec("[A-Z][a-z]{2,8}", 0..3),
        proptest::option::of(1i64..100_000),
        any::<bool>(),
    )
        .prop_map(|(action, persons, amount, ambiguous)| {
            let person_refs: Vec<&str> = persons.iter().map(String::as_str).collect();
            let mut parsed = intent(action, &person_refs, amount);
            parsed.is_ambiguous = ambiguous;
            if ambiguous {
                parsed.clarifying_question = Some("Which one?".to_string());
            }
            parsed
        })
}

fn arb_state() -> impl Strategy<Value = ChatState> {
    prop_oneof![
        Just(ChatState::Idle),
        Just(ChatState::AwaitingClarification),
        arb_intent().prop_map(|parsed| ChatState::AwaitingConfirmation {
            pending: pending_for(parsed),
        }),
        arb_intent().prop_map(|parsed| {
            let id = Uuid::new_v4();
            ChatState::AwaitingDisambiguation {
                pending: pending_for(parsed),
                candidates: vec![Candidate {
                    obligation_id: id,
                    label: "₹100 remaining (one-time)".to_string(),
                }],
            }
        }),
    ]
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // Invariant 1: routing a fresh utterance never mutates the ledger —
    // mutation only ever happens after an explicit Confirm or choice.
    #[test]
    fn prop_staging_never_executes(parsed in arb_intent()) {
        let snapshot = vec![obligation("Rahul", 1000)];
        let result = transition(
            &ChatState::Idle,
            &snapshot,
            Event::IntentReady { reply: reply_for(parsed) },
        ).unwrap();
        prop_assert!(!has_execute(&result.effects));
    }

    // Invariant 2: cancellation from any staged state produces no Execute
    // effect and lands in Idle.
    #[test]
    fn prop_cancel_leaves_ledger_untouched(parsed in arb_intent()) {
        let snapshot = vec![obligation("Rahul", 1000)];

        let confirming = ChatState::AwaitingConfirmation { pending: pending_for(parsed.clone()) };
        let result = transition(&confirming, &snapshot, Event::Deny).unwrap();
        prop_assert!(!has_execute(&result.effects));
        prop_assert_eq!(&result.new_state, &ChatState::Idle);

        let choosing = ChatState::AwaitingDisambiguation {
            pending: pending_for(parsed),
            candidates: vec![Candidate {
                obligation_id: snapshot[0].id,
                label: "x".to_string(),
            }],
        };
        let result = transition(&choosing, &snapshot, Event::ChoiceCancelled).unwrap();
        prop_assert!(!has_execute(&result.effects));
        prop_assert_eq!(&result.new_state, &ChatState::Idle);
    }

    // Invariant 3: a parse failure keeps the state identical and never
    // mutates, so turn N+1 cannot be misrouted by a failure in turn N.
    #[test]
    fn prop_parse_failure_preserves_state(state in arb_state()) {
        let snapshot = vec![obligation("Rahul", 1000)];
        let result = transition(&state, &snapshot, Event::ParseFailed).unwrap();
        prop_assert_eq!(&result.new_state, &state);
        prop_assert!(!has_execute(&result.effects));
        prop_assert!(!result.effects.iter().any(|e| matches!(e, Effect::ClearHistory)));
    }

    // Invariant 4: confirming a target action with two or more matching
    // records always disambiguates instead of mutating.
    #[test]
    fn prop_multiple_matches_disambiguate(
        action in arb_target_action(),
        extra in 2usize..5,
        amount in proptest::option::of(1i64..500),
    ) {
        let snapshot: Vec<Obligation> =
            (0..extra).map(|_| obligation("Anjali", 1000)).collect();
        let parsed = intent(action, &["Anjali"], amount);
        let state = ChatState::AwaitingConfirmation { pending: pending_for(parsed) };

        let result = transition(&state, &snapshot, Event::Confirm).unwrap();
        prop_assert!(!has_execute(&result.effects));
        match &result.new_state {
            ChatState::AwaitingDisambiguation { candidates, .. } => {
                prop_assert_eq!(candidates.len(), extra);
            }
            other => prop_assert!(false, "expected disambiguation, got {other:?}"),
        }
    }

    // Invariant 5: a confirmed single-person add creates exactly one entry
    // with the full amount and no group link.
    #[test]
    fn prop_single_add_creates_one_full_entry(total in 1i64..1_000_000) {
        let parsed = intent(IntentAction::Add, &["Sunita"], Some(total));
        let state = ChatState::AwaitingConfirmation { pending: pending_for(parsed) };

        let result = transition(&state, &[], Event::Confirm).unwrap();
        match find_command(&result.effects) {
            Some(LedgerCommand::CreateObligations { entries, link_group }) => {
                prop_assert_eq!(entries.len(), 1);
                prop_assert!(!*link_group);
                prop_assert_eq!(entries[0].total_amount, Decimal::from(total));
            }
            other => prop_assert!(false, "expected CreateObligations, got {other:?}"),
        }
        prop_assert_eq!(&result.new_state, &ChatState::Idle);
    }

    // Invariant 6: a confirmed k-person add yields k linked entries whose
    // shares are exactly the split over k+1 participants (payer included
    // in the count, excluded from the records).
    #[test]
    fn prop_multi_add_splits_with_payer(total in 2i64..1_000_000, k in 2usize..6) {
        let names: Vec<String> = (0..k).map(|i| format!("Person{i}")).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let parsed = intent(IntentAction::Add, &name_refs, Some(total));
        let state = ChatState::AwaitingConfirmation { pending: pending_for(parsed) };

        let result = transition(&state, &[], Event::Confirm).unwrap();
        match find_command(&result.effects) {
            Some(LedgerCommand::CreateObligations { entries, link_group }) => {
                prop_assert!(*link_group);
                prop_assert_eq!(entries.len(), k);
                let shares = split_shares(Decimal::from(total), k + 1).unwrap();
                for (entry, share) in entries.iter().zip(&shares) {
                    prop_assert_eq!(entry.total_amount, *share);
                }
                // The named persons plus the payer's implicit share cover
                // the whole bill
                let named: Decimal = entries.iter().map(|e| e.total_amount).sum();
                prop_assert_eq!(named + shares[k], Decimal::from(total));
            }
            other => prop_assert!(false, "expected CreateObligations, got {other:?}"),
        }
    }

    // Invariant 7: an oversized settle is rejected without mutation and the
    // pending action stays salvageable.
    #[test]
    fn prop_oversized_settle_rejected(remaining in 1i64..10_000, excess in 1i64..10_000) {
        let snapshot = vec![obligation("Rahul", remaining)];
        let parsed = intent(IntentAction::Settle, &["Rahul"], Some(remaining + excess));
        let state = ChatState::AwaitingConfirmation { pending: pending_for(parsed) };

        let result = transition(&state, &snapshot, Event::Confirm).unwrap();
        prop_assert!(!has_execute(&result.effects));
        prop_assert!(
            matches!(result.new_state, ChatState::AwaitingConfirmation { .. }),
            "expected AwaitingConfirmation, got {:?}",
            result.new_state
        );
    }

    // Invariant 8: signals with nothing staged are rejected, not guessed at.
    #[test]
    fn prop_stray_signals_rejected(index in 0usize..10) {
        let snapshot: Vec<Obligation> = vec![];
        assert_eq!(
            transition(&ChatState::Idle, &snapshot, Event::Confirm).unwrap_err(),
            TransitionError::NothingPending
        );
        assert_eq!(
            transition(&ChatState::Idle, &snapshot, Event::Deny).unwrap_err(),
            TransitionError::NothingPending
        );
        assert_eq!(
            transition(&ChatState::Idle, &snapshot, Event::ChoiceSelected { index }).unwrap_err(),
            TransitionError::NoChoicesPending
        );
    }
}

// ============================================================================
// Sequence Tests - Multi-Step Scenarios
// ============================================================================

/// "Gave Sunita 5k advance, deduct 1k monthly" → staged recurring add →
/// Yes → one obligation with those fields.
#[test]
fn test_recurring_advance_flow() {
    let mut parsed = intent(IntentAction::Add, &["Sunita"], Some(5000));
    parsed.kind = Some(ObligationKind::Recurring);
    parsed.expected_per_cycle = Some(Decimal::from(1000));
    parsed.note = Some("Advance".to_string());

    let result = transition(
        &ChatState::Idle,
        &[],
        Event::IntentReady {
            reply: reply_for(parsed),
        },
    )
    .unwrap();

    assert!(matches!(result.new_state, ChatState::AwaitingConfirmation { .. }));
    assert!(result
        .effects
        .iter()
        .any(|e| matches!(e, Effect::AskConfirmation { .. })));
    assert!(!has_execute(&result.effects));

    let result = transition(&result.new_state, &[], Event::Confirm).unwrap();
    match find_command(&result.effects) {
        Some(LedgerCommand::CreateObligations { entries, link_group }) => {
            assert!(!*link_group);
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].person_name, "Sunita");
            assert_eq!(entries[0].kind, ObligationKind::Recurring);
            assert_eq!(entries[0].direction, Direction::OwesMe);
            assert_eq!(entries[0].total_amount, Decimal::from(5000));
            assert_eq!(entries[0].expected_per_cycle, Some(Decimal::from(1000)));
        }
        other => panic!("expected CreateObligations, got {other:?}"),
    }
    assert_eq!(result.new_state, ChatState::Idle);
}

/// "Dinner with Rahul and Priya, 3200, I paid" → two entries of 1067 each,
/// linked under one group, with the payer's 1066 implicit.
#[test]
fn test_dinner_split_flow() {
    let parsed = intent(IntentAction::Add, &["Rahul", "Priya"], Some(3200));
    let staged = transition(
        &ChatState::Idle,
        &[],
        Event::IntentReady {
            reply: reply_for(parsed),
        },
    )
    .unwrap();

    let result = transition(&staged.new_state, &[], Event::Confirm).unwrap();
    match find_command(&result.effects) {
        Some(LedgerCommand::CreateObligations { entries, link_group }) => {
            assert!(*link_group);
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[0].total_amount, Decimal::from(1067));
            assert_eq!(entries[1].total_amount, Decimal::from(1067));
        }
        other => panic!("expected CreateObligations, got {other:?}"),
    }
}

/// "Rahul paid 500" with exactly one active obligation → payment command
/// against that record.
#[test]
fn test_settle_single_match() {
    let target = obligation("Rahul", 1067);
    let snapshot = vec![target.clone(), obligation("Priya", 1067)];
    let parsed = intent(IntentAction::Settle, &["Rahul"], Some(500));

    let staged = transition(
        &ChatState::Idle,
        &snapshot,
        Event::IntentReady {
            reply: reply_for(parsed),
        },
    )
    .unwrap();
    let result = transition(&staged.new_state, &snapshot, Event::Confirm).unwrap();

    match find_command(&result.effects) {
        Some(LedgerCommand::RecordPayment {
            obligation_id,
            amount,
            ..
        }) => {
            assert_eq!(*obligation_id, target.id);
            assert_eq!(*amount, Decimal::from(500));
        }
        other => panic!("expected RecordPayment, got {other:?}"),
    }
}

/// "Rahul paid 500" with two active obligations → a two-entry choice list;
/// picking entry 0 applies the payment to that record only.
#[test]
fn test_settle_disambiguation() {
    let first = obligation("Rahul", 1067);
    let second = obligation("Rahul", 2500);
    let snapshot = vec![first.clone(), second.clone()];
    let parsed = intent(IntentAction::Settle, &["Rahul"], Some(500));

    let staged = transition(
        &ChatState::Idle,
        &snapshot,
        Event::IntentReady {
            reply: reply_for(parsed),
        },
    )
    .unwrap();
    let asked = transition(&staged.new_state, &snapshot, Event::Confirm).unwrap();

    let candidates = match &asked.new_state {
        ChatState::AwaitingDisambiguation { candidates, .. } => {
            assert_eq!(candidates.len(), 2);
            candidates.clone()
        }
        other => panic!("expected disambiguation, got {other:?}"),
    };
    assert!(asked
        .effects
        .iter()
        .any(|e| matches!(e, Effect::AskChoice { candidates, .. } if candidates.len() == 2)));
    assert!(!has_execute(&asked.effects));

    let picked = transition(
        &asked.new_state,
        &snapshot,
        Event::ChoiceSelected { index: 0 },
    )
    .unwrap();
    match find_command(&picked.effects) {
        Some(LedgerCommand::RecordPayment { obligation_id, .. }) => {
            assert_eq!(*obligation_id, candidates[0].obligation_id);
            assert_eq!(*obligation_id, first.id);
        }
        other => panic!("expected RecordPayment, got {other:?}"),
    }
    assert_eq!(picked.new_state, ChatState::Idle);
}

/// Settle without an amount closes the obligation in full.
#[test]
fn test_settle_without_amount_closes() {
    let target = obligation("Shivam", 3500);
    let snapshot = vec![target.clone()];
    let parsed = intent(IntentAction::Settle, &["Shivam"], None);
    let state = ChatState::AwaitingConfirmation {
        pending: pending_for(parsed),
    };

    let result = transition(&state, &snapshot, Event::Confirm).unwrap();
    match find_command(&result.effects) {
        Some(LedgerCommand::SettleFull { obligation_id, .. }) => {
            assert_eq!(*obligation_id, target.id);
        }
        other => panic!("expected SettleFull, got {other:?}"),
    }
}

/// The target vanished between staging and confirmation (e.g. deleted via
/// the dashboard) → not-found reply, back to Idle, no mutation.
#[test]
fn test_target_vanished_between_staging_and_confirm() {
    let parsed = intent(IntentAction::Delete, &["Rahul"], None);
    let state = ChatState::AwaitingConfirmation {
        pending: pending_for(parsed),
    };

    let result = transition(&state, &[], Event::Confirm).unwrap();
    assert!(!has_execute(&result.effects));
    assert_eq!(result.new_state, ChatState::Idle);
    assert!(result.effects.iter().any(
        |e| matches!(e, Effect::Reply { text } if text.contains("No active obligation found"))
    ));
}

/// A free-text correction replaces the pending action in place.
#[test]
fn test_correction_updates_pending_in_place() {
    let parsed = intent(IntentAction::Add, &["Sunita"], Some(5000));
    let state = ChatState::AwaitingConfirmation {
        pending: pending_for(parsed),
    };

    // "Actually make it 6000"
    let corrected = intent(IntentAction::Add, &["Sunita"], Some(6000));
    let result = transition(
        &state,
        &[],
        Event::IntentReady {
            reply: reply_for(corrected),
        },
    )
    .unwrap();

    match &result.new_state {
        ChatState::AwaitingConfirmation { pending } => {
            assert_eq!(pending.intent.amount, Some(Decimal::from(6000)));
        }
        other => panic!("expected confirmation, got {other:?}"),
    }
    assert!(result
        .effects
        .iter()
        .any(|e| matches!(e, Effect::AskConfirmation { .. })));
    assert!(!has_execute(&result.effects));
}

/// An ambiguous utterance asks the clarifying question and the answer is
/// routed as a fresh turn.
#[test]
fn test_clarification_roundtrip() {
    let mut parsed = intent(IntentAction::Add, &[], None);
    parsed.is_ambiguous = true;
    parsed.clarifying_question = Some("Who did you pay, and how much?".to_string());

    let result = transition(
        &ChatState::Idle,
        &[],
        Event::IntentReady {
            reply: reply_for(parsed),
        },
    )
    .unwrap();
    assert_eq!(result.new_state, ChatState::AwaitingClarification);
    assert!(result.effects.iter().any(
        |e| matches!(e, Effect::Reply { text } if text.contains("Who did you pay"))
    ));

    // The follow-up arrives complete and stages normally
    let complete = intent(IntentAction::Add, &["Ananya"], Some(8900));
    let result = transition(
        &result.new_state,
        &[],
        Event::IntentReady {
            reply: reply_for(complete),
        },
    )
    .unwrap();
    assert!(matches!(result.new_state, ChatState::AwaitingConfirmation { .. }));
}

/// Queries answer from the snapshot without touching state machinery.
#[test]
fn test_query_replies_directly() {
    let snapshot = vec![obligation("Rahul", 1067)];
    let mut parsed = intent(IntentAction::Query, &["Rahul"], None);
    parsed.persons = vec!["Rahul".to_string()];
    let mut reply = reply_for(parsed);
    reply.requires_confirmation = false;

    let result = transition(&ChatState::Idle, &snapshot, Event::IntentReady { reply }).unwrap();
    assert_eq!(result.new_state, ChatState::Idle);
    assert!(!has_execute(&result.effects));
    assert!(result
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Reply { text } if text.contains("₹1,067"))));
    // Queries keep history for follow-ups
    assert!(!result.effects.iter().any(|e| matches!(e, Effect::ClearHistory)));
}

/// Chitchat replies and resets the conversation window.
#[test]
fn test_chitchat_clears_history() {
    let parsed = intent(IntentAction::Chitchat, &[], None);
    let mut reply = reply_for(parsed);
    reply.confirmation_message = "Hey there!".to_string();
    reply.requires_confirmation = false;

    let result = transition(&ChatState::Idle, &[], Event::IntentReady { reply }).unwrap();
    assert_eq!(result.new_state, ChatState::Idle);
    assert!(result.effects.iter().any(|e| matches!(e, Effect::ClearHistory)));
}

/// An out-of-range pick is an error, not a guess.
#[test]
fn test_invalid_choice_index() {
    let snapshot = vec![obligation("Anjali", 1000), obligation("Anjali", 2500)];
    let state = ChatState::AwaitingDisambiguation {
        pending: pending_for(intent(IntentAction::Delete, &["Anjali"], None)),
        candidates: snapshot
            .iter()
            .map(|ob| Candidate {
                obligation_id: ob.id,
                label: "x".to_string(),
            })
            .collect(),
    };

    let err = transition(&state, &snapshot, Event::ChoiceSelected { index: 5 }).unwrap_err();
    assert_eq!(err, TransitionError::InvalidChoice { index: 5, count: 2 });
}
