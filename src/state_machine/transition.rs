//! Pure state transition function
//!
//! Given the current state, the *live* snapshot of active obligations and
//! one event, produce the next state plus effects. No I/O happens here: the
//! snapshot arrives as a value and every mutation leaves as a command, so
//! the whole confirm/disambiguate flow is testable without the model or the
//! store. Target cardinality is always re-checked against the supplied
//! snapshot, never against whatever the model believed at parse time.

use super::state::{Candidate, ChatState, PendingAction};
use super::{Effect, Event, LedgerCommand};
use crate::intent::{ExtractorReply, IntentAction, ParsedIntent};
use crate::ledger::{NewObligation, Obligation, ObligationKind, ObligationPatch, ObligationStatus};
use crate::render::{candidate_label, format_inr, pending_summary};
use crate::split::split_shares;
use rust_decimal::Decimal;
use thiserror::Error;

pub const COULD_NOT_UNDERSTAND: &str = "I couldn't understand that. Could you rephrase?";
const CANCELLED: &str = "Okay, cancelled.";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ChatState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ChatState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Signals that arrived in a state they make no sense in
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("nothing is awaiting confirmation")]
    NothingPending,
    #[error("no choice list is open")]
    NoChoicesPending,
    #[error("a choice list is open; pick an option or cancel")]
    ChoiceRequired,
    #[error("choice {index} is out of range ({count} options)")]
    InvalidChoice { index: usize, count: usize },
}

/// Pure transition function: one arm per (state, event) pair
pub fn transition(
    state: &ChatState,
    snapshot: &[Obligation],
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Fresh utterances (clarification answers route identically;
        // free text over an open choice list abandons the staged action)
        // ============================================================
        (
            ChatState::Idle | ChatState::AwaitingClarification | ChatState::AwaitingDisambiguation { .. },
            Event::IntentReady { reply },
        ) => Ok(route_fresh(&reply, snapshot)),

        // Free-text correction while a confirmation is pending
        (ChatState::AwaitingConfirmation { pending }, Event::IntentReady { reply }) => {
            Ok(apply_correction(pending, &reply, snapshot))
        }

        // Extraction failure never routes anywhere: same state, no mutation
        (state, Event::ParseFailed) => {
            Ok(TransitionResult::new(state.clone()).with_effect(Effect::reply(COULD_NOT_UNDERSTAND)))
        }

        // ============================================================
        // Confirmation
        // ============================================================
        (ChatState::AwaitingConfirmation { pending }, Event::Confirm) => {
            Ok(resolve_confirmed(pending, snapshot))
        }

        (ChatState::AwaitingConfirmation { .. }, Event::Deny) => Ok(cancelled()),

        // ============================================================
        // Disambiguation
        // ============================================================
        (
            ChatState::AwaitingDisambiguation { pending, candidates },
            Event::ChoiceSelected { index },
        ) => resolve_choice(pending, candidates, index, snapshot),

        (ChatState::AwaitingDisambiguation { .. }, Event::ChoiceCancelled | Event::Deny) => {
            Ok(cancelled())
        }

        // ============================================================
        // Signals with nothing to act on
        // ============================================================
        (ChatState::Idle | ChatState::AwaitingClarification, Event::Confirm | Event::Deny) => {
            Err(TransitionError::NothingPending)
        }

        (ChatState::AwaitingDisambiguation { .. }, Event::Confirm) => {
            Err(TransitionError::ChoiceRequired)
        }

        (_, Event::ChoiceSelected { .. } | Event::ChoiceCancelled) => {
            Err(TransitionError::NoChoicesPending)
        }
    }
}

// ============================================================
// Routing
// ============================================================

fn route_fresh(reply: &ExtractorReply, snapshot: &[Obligation]) -> TransitionResult {
    let Some(intent) = reply.parsed.clone() else {
        // The model answered without a structured intent; relay and reset
        return TransitionResult::new(ChatState::Idle)
            .with_effect(Effect::reply(reply.confirmation_message.clone()))
            .with_effect(Effect::ClearHistory);
    };

    if intent.is_ambiguous {
        return clarify(&intent, reply);
    }

    match intent.action {
        IntentAction::Chitchat | IntentAction::OffTopic => TransitionResult::new(ChatState::Idle)
            .with_effect(Effect::reply(reply.confirmation_message.clone()))
            .with_effect(Effect::ClearHistory),

        // Queries answer directly; history is kept for continuity
        IntentAction::Query => TransitionResult::new(ChatState::Idle)
            .with_effect(Effect::reply(query_answer(&intent, snapshot))),

        IntentAction::Add
        | IntentAction::Settle
        | IntentAction::Edit
        | IntentAction::Delete => match staging_gap(&intent) {
            // The model claimed the intent was complete but a required
            // field is missing; ask rather than stage a broken action
            Some(question) => {
                let text = intent
                    .clarifying_question
                    .clone()
                    .unwrap_or_else(|| question.to_string());
                TransitionResult::new(ChatState::AwaitingClarification)
                    .with_effect(Effect::reply(text))
            }
            None => stage(intent, reply.confirmation_message.clone()),
        },
    }
}

fn apply_correction(
    pending: &PendingAction,
    reply: &ExtractorReply,
    snapshot: &[Obligation],
) -> TransitionResult {
    let stay = ChatState::AwaitingConfirmation {
        pending: pending.clone(),
    };

    match reply.parsed.clone() {
        Some(intent) if intent.is_ambiguous => {
            let text = intent
                .clarifying_question
                .clone()
                .unwrap_or_else(|| reply.confirmation_message.clone());
            TransitionResult::new(stay).with_effect(Effect::reply(text))
        }
        Some(intent) if intent.action.is_mutating() => match staging_gap(&intent) {
            // Incomplete correction: keep the old pending action alive
            Some(question) => {
                TransitionResult::new(stay).with_effect(Effect::reply(question.to_string()))
            }
            None => stage(intent, reply.confirmation_message.clone()),
        },
        Some(intent) if intent.action == IntentAction::Query => {
            TransitionResult::new(stay).with_effect(Effect::reply(query_answer(&intent, snapshot)))
        }
        _ => TransitionResult::new(stay)
            .with_effect(Effect::reply(reply.confirmation_message.clone())),
    }
}

/// The field a mutating intent is missing before it can be staged
fn staging_gap(intent: &ParsedIntent) -> Option<&'static str> {
    match intent.action {
        IntentAction::Add => {
            if intent.persons.is_empty() {
                Some("Who is this for, and how much?")
            } else if !intent.amount.is_some_and(|a| a > Decimal::ZERO) {
                Some("How much was it?")
            } else {
                None
            }
        }
        IntentAction::Settle | IntentAction::Edit | IntentAction::Delete => {
            intent.persons.is_empty().then_some("Whose record do you mean?")
        }
        _ => None,
    }
}

fn clarify(intent: &ParsedIntent, reply: &ExtractorReply) -> TransitionResult {
    let text = intent
        .clarifying_question
        .clone()
        .unwrap_or_else(|| reply.confirmation_message.clone());
    TransitionResult::new(ChatState::AwaitingClarification).with_effect(Effect::reply(text))
}

fn stage(intent: ParsedIntent, summary: String) -> TransitionResult {
    TransitionResult::new(ChatState::AwaitingConfirmation {
        pending: PendingAction {
            intent,
            summary: summary.clone(),
        },
    })
    .with_effect(Effect::ask_confirmation(summary))
}

fn cancelled() -> TransitionResult {
    TransitionResult::new(ChatState::Idle)
        .with_effect(Effect::reply(CANCELLED))
        .with_effect(Effect::ClearHistory)
}

fn done_with_reply(text: impl Into<String>) -> TransitionResult {
    TransitionResult::new(ChatState::Idle)
        .with_effect(Effect::reply(text.into()))
        .with_effect(Effect::ClearHistory)
}

fn executed(command: LedgerCommand) -> TransitionResult {
    TransitionResult::new(ChatState::Idle)
        .with_effect(Effect::execute(command))
        .with_effect(Effect::ClearHistory)
}

// ============================================================
// Confirmation resolution
// ============================================================

fn resolve_confirmed(pending: &PendingAction, snapshot: &[Obligation]) -> TransitionResult {
    let intent = &pending.intent;
    match intent.action {
        IntentAction::Add => confirm_add(intent),

        IntentAction::Settle | IntentAction::Edit | IntentAction::Delete => {
            let Some(name) = intent.persons.first() else {
                return done_with_reply("I lost track of whose record that was. Please start over.");
            };
            let matches = matches_for(snapshot, name);
            match matches.len() {
                0 => done_with_reply(format!("No active obligation found for {name}.")),
                1 => match build_command(intent, matches[0]) {
                    Ok(command) => executed(command),
                    // Salvageable: correct it with free text, or say No
                    Err(message) => TransitionResult::new(ChatState::AwaitingConfirmation {
                        pending: pending.clone(),
                    })
                    .with_effect(Effect::reply(message)),
                },
                _ => {
                    let candidates: Vec<Candidate> = matches
                        .iter()
                        .map(|ob| Candidate {
                            obligation_id: ob.id,
                            label: candidate_label(ob),
                        })
                        .collect();
                    let text = format!(
                        "{name} has {} active records — which one did you mean?",
                        candidates.len()
                    );
                    TransitionResult::new(ChatState::AwaitingDisambiguation {
                        pending: pending.clone(),
                        candidates: candidates.clone(),
                    })
                    .with_effect(Effect::AskChoice { text, candidates })
                }
            }
        }

        // Non-mutating actions are never staged
        IntentAction::Query | IntentAction::Chitchat | IntentAction::OffTopic => {
            done_with_reply("Nothing to confirm. Send a new message.")
        }
    }
}

fn confirm_add(intent: &ParsedIntent) -> TransitionResult {
    let Some(total) = intent.amount.filter(|a| *a > Decimal::ZERO) else {
        return done_with_reply("Missing person or amount. Please try again.");
    };
    if intent.persons.is_empty() {
        return done_with_reply("Missing person or amount. Please try again.");
    }

    let kind = intent.kind.unwrap_or(ObligationKind::OneTime);

    // Shared one-time expense: the payer is one of the divisors but never
    // gets their own record
    if intent.persons.len() > 1 && kind == ObligationKind::OneTime {
        let shares = match split_shares(total, intent.persons.len() + 1) {
            Ok(shares) => shares,
            Err(e) => return done_with_reply(format!("Can't split that: {e}")),
        };
        let entries = intent
            .persons
            .iter()
            .zip(shares)
            .map(|(person, share)| NewObligation {
                person_name: person.clone(),
                kind,
                direction: intent.direction,
                total_amount: share,
                expected_per_cycle: None,
                note: intent.note.clone(),
                group_id: None,
            })
            .collect();
        return executed(LedgerCommand::CreateObligations {
            entries,
            link_group: true,
        });
    }

    let expected_per_cycle = if kind == ObligationKind::Recurring {
        intent.expected_per_cycle
    } else {
        None
    };
    let entries = intent
        .persons
        .iter()
        .map(|person| NewObligation {
            person_name: person.clone(),
            kind,
            direction: intent.direction,
            total_amount: total,
            expected_per_cycle,
            note: intent.note.clone(),
            group_id: None,
        })
        .collect();
    executed(LedgerCommand::CreateObligations {
        entries,
        link_group: false,
    })
}

fn resolve_choice(
    pending: &PendingAction,
    candidates: &[Candidate],
    index: usize,
    snapshot: &[Obligation],
) -> Result<TransitionResult, TransitionError> {
    let Some(candidate) = candidates.get(index) else {
        return Err(TransitionError::InvalidChoice {
            index,
            count: candidates.len(),
        });
    };

    let target = snapshot
        .iter()
        .find(|ob| ob.id == candidate.obligation_id && ob.status == ObligationStatus::Active);

    Ok(match target {
        // Deleted or settled between the list and the pick
        None => done_with_reply("That record is no longer active. Nothing was changed."),
        Some(target) => match build_command(&pending.intent, target) {
            Ok(command) => executed(command),
            Err(message) => done_with_reply(message),
        },
    })
}

/// Turn a staged intent plus its uniquely-resolved target into a ledger
/// command, or a validation message if the action cannot run as described
fn build_command(intent: &ParsedIntent, target: &Obligation) -> Result<LedgerCommand, String> {
    match intent.action {
        IntentAction::Settle => match intent.amount {
            Some(amount) if amount <= Decimal::ZERO => {
                Err("The payment amount has to be positive.".to_string())
            }
            Some(amount) if amount > target.remaining_amount => Err(format!(
                "That's more than {}'s balance — only {} remaining. Did you mean a smaller amount?",
                target.person_name,
                format_inr(target.remaining_amount)
            )),
            Some(amount) => Ok(LedgerCommand::RecordPayment {
                obligation_id: target.id,
                person: target.person_name.clone(),
                amount,
                note: intent.note.clone(),
            }),
            None => Ok(LedgerCommand::SettleFull {
                obligation_id: target.id,
                person: target.person_name.clone(),
            }),
        },

        IntentAction::Edit => {
            let patch = ObligationPatch {
                person_name: None,
                total_amount: intent.amount,
                expected_per_cycle: intent.expected_per_cycle,
                remaining_amount: None,
                note: intent.note.clone(),
            };
            if patch.is_empty() {
                Err(format!(
                    "Tell me what to change on {}'s record — the total, the monthly deduction, or the note.",
                    target.person_name
                ))
            } else {
                Ok(LedgerCommand::EditObligation {
                    obligation_id: target.id,
                    person: target.person_name.clone(),
                    patch,
                })
            }
        }

        IntentAction::Delete => Ok(LedgerCommand::DeleteObligation {
            obligation_id: target.id,
            person: target.person_name.clone(),
        }),

        IntentAction::Add | IntentAction::Query | IntentAction::Chitchat
        | IntentAction::OffTopic => Err("Nothing to confirm. Send a new message.".to_string()),
    }
}

// ============================================================
// Queries and matching
// ============================================================

fn query_answer(intent: &ParsedIntent, snapshot: &[Obligation]) -> String {
    match intent.persons.first() {
        Some(name) => {
            let matches: Vec<Obligation> =
                matches_for(snapshot, name).into_iter().cloned().collect();
            if matches.is_empty() {
                format!("No pending obligations for {name}.")
            } else {
                pending_summary(&matches)
            }
        }
        None => pending_summary(snapshot),
    }
}

fn matches_for<'a>(snapshot: &'a [Obligation], name: &str) -> Vec<&'a Obligation> {
    let needle = name.to_lowercase();
    snapshot
        .iter()
        .filter(|ob| ob.status == ObligationStatus::Active)
        .filter(|ob| ob.person_name.to_lowercase().contains(&needle))
        .collect()
}
