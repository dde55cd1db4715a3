//! Conversation orchestrator
//!
//! The impure driver around the pure state machine: it loads the session
//! and a fresh ledger snapshot, runs the intent extractor for free-text
//! turns, feeds one event through `transition`, executes the resulting
//! ledger commands and renders the outbound reply. Every failure mode is
//! converted to a single response here; nothing propagates past a turn.

use crate::intent::IntentExtractor;
use crate::ledger::{LedgerError, LedgerStore, ObligationStatus};
use crate::render::format_inr;
use crate::session::{Session, SessionStore};
use crate::state_machine::{
    transition, ChatState, Effect, Event, LedgerCommand, TransitionError,
};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

const TRANSIENT_FAILURE: &str =
    "Something went wrong on my end — nothing was changed. Please try that again.";

/// One inbound message: free text, or a structured button press
#[derive(Debug, Clone)]
pub enum Inbound {
    Text(String),
    Signal(Signal),
}

/// Structured confirmation / disambiguation signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Yes,
    No,
    Choice(usize),
    Cancel,
}

/// A selectable choice shown with a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChoiceOption {
    pub id: String,
    pub label: String,
}

/// The single outbound response for a turn
#[derive(Debug, Clone, Serialize)]
pub struct Outbound {
    pub reply: String,
    pub choices: Vec<ChoiceOption>,
}

impl Outbound {
    fn plain(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            choices: vec![],
        }
    }
}

/// Drives one conversation turn end to end
pub struct Orchestrator {
    ledger: LedgerStore,
    extractor: IntentExtractor,
    sessions: SessionStore,
}

impl Orchestrator {
    pub fn new(ledger: LedgerStore, extractor: IntentExtractor) -> Self {
        Self {
            ledger,
            extractor,
            sessions: SessionStore::new(),
        }
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Consume one inbound message and produce one outbound response
    pub async fn handle(&self, conversation_id: &str, inbound: Inbound) -> Outbound {
        let mut session = self.sessions.take(conversation_id).await;
        let outbound = self.process(&mut session, inbound).await;
        tracing::debug!(
            conversation = conversation_id,
            state = session.state.name(),
            "turn complete"
        );
        self.sessions.put(conversation_id, session).await;
        outbound
    }

    async fn process(&self, session: &mut Session, inbound: Inbound) -> Outbound {
        let snapshot = match self.ledger.list(Some(ObligationStatus::Active)) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(error = %e, "failed to load ledger snapshot");
                return Outbound::plain(TRANSIENT_FAILURE);
            }
        };

        // Free text goes through the extractor; signals map directly. On a
        // parse failure the utterance is not recorded, so the session is
        // exactly as it was.
        let (event, utterance) = match inbound {
            Inbound::Signal(Signal::Yes) => (Event::Confirm, None),
            Inbound::Signal(Signal::No) => (Event::Deny, None),
            Inbound::Signal(Signal::Choice(index)) => (Event::ChoiceSelected { index }, None),
            Inbound::Signal(Signal::Cancel) => (Event::ChoiceCancelled, None),
            Inbound::Text(text) => {
                match self
                    .extractor
                    .extract(&text, &snapshot, session.history.turns())
                    .await
                {
                    Ok(reply) => (Event::IntentReady { reply }, Some(text)),
                    Err(failure) => {
                        tracing::warn!(error = %failure, "intent extraction failed");
                        (Event::ParseFailed, None)
                    }
                }
            }
        };

        let result = match transition(&session.state, &snapshot, event) {
            Ok(result) => result,
            Err(err) => return Outbound::plain(signal_rebuff(&err)),
        };

        let mut reply_parts: Vec<String> = vec![];
        let mut choices: Vec<ChoiceOption> = vec![];
        let mut clear_history = false;

        for effect in &result.effects {
            match effect {
                Effect::Reply { text } => reply_parts.push(text.clone()),
                Effect::AskConfirmation { text } => {
                    reply_parts.push(text.clone());
                    choices = vec![
                        ChoiceOption {
                            id: "confirm_yes".to_string(),
                            label: "Yes ✓".to_string(),
                        },
                        ChoiceOption {
                            id: "confirm_no".to_string(),
                            label: "No ✗".to_string(),
                        },
                    ];
                }
                Effect::AskChoice { text, candidates } => {
                    reply_parts.push(text.clone());
                    choices = candidates
                        .iter()
                        .enumerate()
                        .map(|(i, c)| ChoiceOption {
                            id: format!("choice_{i}"),
                            label: c.label.clone(),
                        })
                        .collect();
                    choices.push(ChoiceOption {
                        id: "choice_cancel".to_string(),
                        label: "Cancel".to_string(),
                    });
                }
                Effect::ClearHistory => clear_history = true,
                Effect::Execute { command } => match self.run_command(command) {
                    Ok(text) => reply_parts.push(text),
                    // The session keeps its previous state: a transient
                    // store failure preserves the pending action so the
                    // user can retry the confirmation, and a vanished
                    // target resets cleanly.
                    Err(err) => return command_failed(session, &err),
                },
            }
        }

        session.state = result.new_state;
        if clear_history {
            session.history.clear();
        }

        let reply = if reply_parts.is_empty() {
            "Okay.".to_string()
        } else {
            reply_parts.join("\n")
        };
        if let Some(utterance) = utterance {
            if !clear_history {
                session.history.push(utterance, reply.clone());
            }
        }

        Outbound { reply, choices }
    }

    fn run_command(&self, command: &LedgerCommand) -> Result<String, LedgerError> {
        match command {
            LedgerCommand::CreateObligations {
                entries,
                link_group,
            } => {
                let group_id =
                    (*link_group && entries.len() > 1).then(Uuid::new_v4);

                let mut created: Vec<String> = vec![];
                for entry in entries {
                    let person = entry.person_name.clone();
                    let mut entry = entry.clone();
                    entry.group_id = group_id;
                    match self.ledger.create(entry) {
                        Ok(ob) => created.push(if group_id.is_some() {
                            format!("{} ({})", ob.person_name, format_inr(ob.total_amount))
                        } else {
                            ob.person_name
                        }),
                        Err(e) if created.is_empty() => return Err(e),
                        // Split members are independent records; a partial
                        // failure is surfaced, not rolled back
                        Err(e) => {
                            tracing::error!(error = %e, person = %person, "split member creation failed");
                            return Ok(format!(
                                "Added: {}. But {person}'s entry failed — please add it again.",
                                created.join(", ")
                            ));
                        }
                    }
                }
                Ok(format!("Done! Added: {}", created.join(", ")))
            }

            LedgerCommand::RecordPayment {
                obligation_id,
                person,
                amount,
                note,
            } => {
                let ob = self
                    .ledger
                    .append_transaction(*obligation_id, *amount, note.as_deref())?;
                if ob.status == ObligationStatus::Settled {
                    Ok(format!(
                        "{person}: paid {} — that settles it!",
                        format_inr(*amount)
                    ))
                } else {
                    Ok(format!(
                        "{person}: paid {}, {} remaining.",
                        format_inr(*amount),
                        format_inr(ob.remaining_amount)
                    ))
                }
            }

            LedgerCommand::SettleFull {
                obligation_id,
                person,
            } => {
                let ob = self.ledger.settle(*obligation_id)?;
                let amount = ob
                    .transactions
                    .last()
                    .map(|t| t.amount)
                    .unwrap_or(Decimal::ZERO);
                Ok(format!("{person}: settled {}!", format_inr(amount)))
            }

            LedgerCommand::EditObligation {
                obligation_id,
                person,
                patch,
            } => {
                self.ledger.update(*obligation_id, patch)?;
                Ok(format!("Updated {person}'s record."))
            }

            LedgerCommand::DeleteObligation {
                obligation_id,
                person,
            } => {
                self.ledger.delete(*obligation_id)?;
                Ok(format!("Deleted obligation for {person}."))
            }
        }
    }
}

fn command_failed(session: &mut Session, err: &LedgerError) -> Outbound {
    match err {
        // The target vanished or settled between staging and execution
        // (e.g. a concurrent dashboard edit); discard the pending action
        LedgerError::NotFound(_) | LedgerError::AlreadySettled(_) => {
            tracing::warn!(error = %err, "target changed before execution");
            session.state = ChatState::Idle;
            session.history.clear();
            Outbound::plain(
                "That record changed before I could update it — it's gone or already settled. \
                 Nothing was changed.",
            )
        }
        LedgerError::ExceedsRemaining { remaining, .. } => Outbound::plain(format!(
            "That's more than the remaining {} — nothing was changed.",
            format_inr(*remaining)
        )),
        LedgerError::InvalidAmount(amount) => Outbound::plain(format!(
            "That amount ({amount}) doesn't work here. Nothing was changed."
        )),
        LedgerError::RemainingIncreased { .. } => {
            Outbound::plain("The remaining balance can only go down. Nothing was changed.")
        }
        LedgerError::Sqlite(e) => {
            tracing::error!(error = %e, "ledger write failed");
            Outbound::plain(TRANSIENT_FAILURE)
        }
    }
}

fn signal_rebuff(err: &TransitionError) -> String {
    match err {
        TransitionError::NothingPending => "Nothing to confirm. Send a new message.".to_string(),
        TransitionError::NoChoicesPending => {
            "There's no choice list open. Send a new message.".to_string()
        }
        TransitionError::ChoiceRequired => "Pick one of the listed options, or cancel.".to_string(),
        TransitionError::InvalidChoice { count, .. } => {
            format!("That option isn't on the list — pick 1 to {count}, or cancel.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentExtractor;
    use crate::ledger::{Direction, NewObligation, ObligationKind};
    use crate::llm::{CompletionRequest, LlmError, LlmService};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted language model: pops one canned response per call
    struct FakeLlm {
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
    }

    impl FakeLlm {
        fn scripted(responses: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().collect()),
            })
        }
    }

    #[async_trait]
    impl LlmService for FakeLlm {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::unknown("no scripted response left")))
        }

        fn model_id(&self) -> &str {
            "scripted"
        }
    }

    fn orchestrator(responses: Vec<Result<String, LlmError>>) -> Orchestrator {
        let ledger = LedgerStore::open_in_memory().unwrap();
        let extractor = IntentExtractor::new(FakeLlm::scripted(responses));
        Orchestrator::new(ledger, extractor)
    }

    fn add_reply(
        persons: &[&str],
        amount: i64,
        kind: &str,
        per_cycle: Option<i64>,
        note: &str,
    ) -> Result<String, LlmError> {
        Ok(json!({
            "parsed": {
                "action": "add",
                "persons": persons,
                "direction": "owes_me",
                "amount": amount,
                "obligation_type": kind,
                "expected_per_cycle": per_cycle,
                "note": note,
                "is_ambiguous": false,
                "clarifying_question": null
            },
            "confirmation_message": "Should I log this?",
            "requires_confirmation": true
        })
        .to_string())
    }

    fn settle_reply(person: &str, amount: Option<i64>) -> Result<String, LlmError> {
        Ok(json!({
            "parsed": {
                "action": "settle",
                "persons": [person],
                "direction": "owes_me",
                "amount": amount,
                "obligation_type": null,
                "expected_per_cycle": null,
                "note": null,
                "is_ambiguous": false,
                "clarifying_question": null
            },
            "confirmation_message": format!("{person} paid. Update?"),
            "requires_confirmation": true
        })
        .to_string())
    }

    fn seed(orch: &Orchestrator, person: &str, total: i64) -> Uuid {
        orch.ledger()
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
            .id
    }

    #[tokio::test]
    async fn recurring_advance_end_to_end() {
        let orch = orchestrator(vec![add_reply(
            &["Sunita"],
            5000,
            "recurring",
            Some(1000),
            "Advance",
        )]);

        let staged = orch
            .handle("chat", Inbound::Text("Gave Sunita 5k advance, deduct 1k monthly".into()))
            .await;
        assert_eq!(staged.choices.len(), 2);
        assert_eq!(staged.choices[0].id, "confirm_yes");
        assert!(orch.ledger().list(None).unwrap().is_empty());

        let confirmed = orch.handle("chat", Inbound::Signal(Signal::Yes)).await;
        assert!(confirmed.reply.contains("Done! Added: Sunita"));

        let obligations = orch.ledger().list(None).unwrap();
        assert_eq!(obligations.len(), 1);
        let ob = &obligations[0];
        assert_eq!(ob.kind, ObligationKind::Recurring);
        assert_eq!(ob.total_amount, Decimal::from(5000));
        assert_eq!(ob.remaining_amount, Decimal::from(5000));
        assert_eq!(ob.expected_per_cycle, Some(Decimal::from(1000)));
        assert_eq!(ob.status, ObligationStatus::Active);
        assert_eq!(ob.direction, Direction::OwesMe);
    }

    #[tokio::test]
    async fn dinner_split_creates_linked_records() {
        let orch = orchestrator(vec![add_reply(
            &["Rahul", "Priya"],
            3200,
            "one_time",
            None,
            "Dinner split",
        )]);

        orch.handle("chat", Inbound::Text("Dinner with Rahul and Priya, 3200, I paid".into()))
            .await;
        let done = orch.handle("chat", Inbound::Signal(Signal::Yes)).await;
        assert!(done.reply.contains("Rahul (₹1,067)"));
        assert!(done.reply.contains("Priya (₹1,067)"));

        let obligations = orch.ledger().list(None).unwrap();
        assert_eq!(obligations.len(), 2);
        let group = obligations[0].group_id.unwrap();
        assert!(obligations.iter().all(|ob| ob.group_id == Some(group)));
        let named: Decimal = obligations.iter().map(|ob| ob.remaining_amount).sum();
        // Two shares of 1067 plus the payer's implicit 1066 covers 3200
        assert_eq!(named, Decimal::from(2134));
    }

    #[tokio::test]
    async fn payment_decrements_single_match() {
        let orch = orchestrator(vec![settle_reply("Rahul", Some(500))]);
        let id = seed(&orch, "Rahul", 1067);

        orch.handle("chat", Inbound::Text("Rahul paid 500".into())).await;
        let done = orch.handle("chat", Inbound::Signal(Signal::Yes)).await;
        assert!(done.reply.contains("₹567 remaining"));

        let ob = orch.ledger().get(id).unwrap();
        assert_eq!(ob.remaining_amount, Decimal::from(567));
        assert_eq!(ob.status, ObligationStatus::Active);
        assert_eq!(ob.transactions.len(), 1);
    }

    #[tokio::test]
    async fn two_matches_require_disambiguation() {
        let orch = orchestrator(vec![settle_reply("Rahul", Some(500))]);
        let first = seed(&orch, "Rahul", 1067);
        let second = seed(&orch, "Rahul", 2500);

        orch.handle("chat", Inbound::Text("Rahul paid 500".into())).await;
        let asked = orch.handle("chat", Inbound::Signal(Signal::Yes)).await;
        // Two candidates plus Cancel
        assert_eq!(asked.choices.len(), 3);
        assert_eq!(asked.choices[0].id, "choice_0");
        assert_eq!(asked.choices[2].id, "choice_cancel");

        // Nothing mutated yet
        assert_eq!(
            orch.ledger().get(first).unwrap().remaining_amount,
            Decimal::from(1067)
        );

        let done = orch.handle("chat", Inbound::Signal(Signal::Choice(0))).await;
        assert!(done.reply.contains("paid ₹500"));
        assert_eq!(
            orch.ledger().get(first).unwrap().remaining_amount,
            Decimal::from(567)
        );
        assert_eq!(
            orch.ledger().get(second).unwrap().remaining_amount,
            Decimal::from(2500)
        );
    }

    #[tokio::test]
    async fn no_discards_the_pending_action() {
        let orch = orchestrator(vec![add_reply(&["Sunita"], 5000, "one_time", None, "")]);

        orch.handle("chat", Inbound::Text("Gave Sunita 5000".into())).await;
        let cancelled = orch.handle("chat", Inbound::Signal(Signal::No)).await;
        assert!(cancelled.reply.contains("cancelled"));
        assert!(orch.ledger().list(None).unwrap().is_empty());

        // The conversation is back to Idle: a stray Yes has nothing to act on
        let stray = orch.handle("chat", Inbound::Signal(Signal::Yes)).await;
        assert!(stray.reply.contains("Nothing to confirm"));
    }

    #[tokio::test]
    async fn oversized_payment_is_rejected_and_correctable() {
        let orch = orchestrator(vec![
            settle_reply("Rahul", Some(5000)),
            settle_reply("Rahul", Some(500)),
        ]);
        let id = seed(&orch, "Rahul", 1067);

        orch.handle("chat", Inbound::Text("Rahul paid 5000".into())).await;
        let rejected = orch.handle("chat", Inbound::Signal(Signal::Yes)).await;
        assert!(rejected.reply.contains("₹1,067"));
        assert_eq!(
            orch.ledger().get(id).unwrap().remaining_amount,
            Decimal::from(1067)
        );

        // Free-text correction while still awaiting confirmation
        orch.handle("chat", Inbound::Text("sorry, it was 500".into())).await;
        orch.handle("chat", Inbound::Signal(Signal::Yes)).await;
        assert_eq!(
            orch.ledger().get(id).unwrap().remaining_amount,
            Decimal::from(567)
        );
    }

    #[tokio::test]
    async fn parse_failure_changes_nothing() {
        let orch = orchestrator(vec![
            Err(LlmError::timeout("deadline elapsed")),
            Ok("{ not json".to_string()),
        ]);
        seed(&orch, "Rahul", 1067);

        let first = orch.handle("chat", Inbound::Text("Rahul paid 500".into())).await;
        assert!(first.reply.contains("couldn't understand"));
        let second = orch.handle("chat", Inbound::Text("Rahul paid 500".into())).await;
        assert!(second.reply.contains("couldn't understand"));

        let ob = &orch.ledger().list(None).unwrap()[0];
        assert_eq!(ob.remaining_amount, Decimal::from(1067));
    }

    #[tokio::test]
    async fn query_answers_without_confirmation() {
        let orch = orchestrator(vec![Ok(json!({
            "parsed": {
                "action": "query",
                "persons": [],
                "direction": "owes_me",
                "amount": null,
                "obligation_type": null,
                "expected_per_cycle": null,
                "note": null,
                "is_ambiguous": false,
                "clarifying_question": null
            },
            "confirmation_message": "Let me check.",
            "requires_confirmation": false
        })
        .to_string())]);
        seed(&orch, "Rahul", 1067);

        let answer = orch.handle("chat", Inbound::Text("What's pending?".into())).await;
        assert!(answer.choices.is_empty());
        assert!(answer.reply.contains("Rahul — ₹1,067"));
        assert!(answer.reply.contains("Total pending: ₹1,067"));
    }
}
