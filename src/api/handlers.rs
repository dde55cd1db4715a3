//! HTTP request handlers

use super::types::{
    AddTransactionRequest, ChatRequest, ChatSignal, CreateObligationRequest, DeletedResponse,
    ErrorResponse,
};
use super::AppState;
use crate::ledger::{LedgerError, NewObligation, Obligation, ObligationPatch, ObligationStatus};
use crate::orchestrator::{Inbound, Outbound, Signal};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Conversational path
        .route("/api/chat", post(chat))
        // Dashboard path
        .route("/api/obligations", get(list_obligations).post(create_obligation))
        .route(
            "/api/obligations/:id",
            get(get_obligation)
                .patch(update_obligation)
                .delete(delete_obligation),
        )
        .route("/api/obligations/:id/transactions", post(add_transaction))
        .route("/api/obligations/:id/settle", post(settle_obligation))
        .with_state(state)
}

// ============================================================
// Chat
// ============================================================

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Outbound>, AppError> {
    let inbound = match (req.text, req.signal) {
        (Some(text), None) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                return Err(AppError::BadRequest("empty message".to_string()));
            }
            Inbound::Text(text)
        }
        (None, Some(signal)) => Inbound::Signal(match signal {
            ChatSignal::Yes => Signal::Yes,
            ChatSignal::No => Signal::No,
            ChatSignal::Cancel => Signal::Cancel,
            ChatSignal::Choice { index } => Signal::Choice(index),
        }),
        _ => {
            return Err(AppError::BadRequest(
                "send either text or a signal, not both".to_string(),
            ))
        }
    };

    let outbound = state
        .orchestrator
        .handle(&req.conversation_id, inbound)
        .await;
    Ok(Json(outbound))
}

// ============================================================
// Obligations (dashboard REST surface)
// ============================================================

#[derive(Debug, Deserialize)]
struct ListParams {
    status: Option<String>,
}

async fn list_obligations(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Obligation>>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(ObligationStatus::parse)
        .transpose()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(Json(state.orchestrator.ledger().list(status)?))
}

async fn create_obligation(
    State(state): State<AppState>,
    Json(req): Json<CreateObligationRequest>,
) -> Result<Json<Obligation>, AppError> {
    let created = state.orchestrator.ledger().create(NewObligation {
        person_name: req.person_name,
        kind: req.kind,
        direction: req.direction,
        total_amount: req.total_amount,
        expected_per_cycle: req.expected_per_cycle,
        note: req.note,
        group_id: None,
    })?;
    tracing::info!(id = %created.id, person = %created.person_name, "created obligation");
    Ok(Json(created))
}

async fn get_obligation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Obligation>, AppError> {
    Ok(Json(state.orchestrator.ledger().get(id)?))
}

async fn update_obligation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<ObligationPatch>,
) -> Result<Json<Obligation>, AppError> {
    let updated = state.orchestrator.ledger().update(id, &patch)?;
    tracing::info!(id = %id, "updated obligation");
    Ok(Json(updated))
}

async fn delete_obligation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeletedResponse>, AppError> {
    state.orchestrator.ledger().delete(id)?;
    tracing::info!(id = %id, "deleted obligation");
    Ok(Json(DeletedResponse { deleted: true }))
}

async fn add_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddTransactionRequest>,
) -> Result<Json<Obligation>, AppError> {
    let ledger = state.orchestrator.ledger();

    // One-time obligations are settled in full on the dashboard path; the
    // chat path is where partial payments get confirmed interactively
    let existing = ledger.get(id)?;
    if existing.kind == crate::ledger::ObligationKind::OneTime
        && req.amount != existing.remaining_amount
    {
        return Err(AppError::BadRequest(
            "one-time obligations must be settled in full".to_string(),
        ));
    }

    let updated = ledger.append_transaction(id, req.amount, req.note.as_deref())?;
    tracing::info!(id = %id, amount = %req.amount, "recorded transaction");
    Ok(Json(updated))
}

async fn settle_obligation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Obligation>, AppError> {
    let settled = state.orchestrator.ledger().settle(id)?;
    tracing::info!(id = %id, "settled obligation");
    Ok(Json(settled))
}

// ============================================================
// Errors
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(id) => AppError::NotFound(format!("obligation not found: {id}")),
            LedgerError::Sqlite(e) => AppError::Internal(e.to_string()),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::Internal(message) => {
                tracing::error!(error = %message, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}
