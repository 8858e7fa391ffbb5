//! Wallet top-up and transaction listing endpoints.

use crate::rest::{bad_request, domain_error, ApiError, AppState, MAX_FIELD_LEN};
use axum::extract::{Path, Query, State};
use axum::Json;
use motorads_core::types::{TransactionKind, WalletTransaction};
use motorads_store::TransactionFilter;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_TRANSACTIONS_PAGE: usize = 500;

#[derive(Debug, Deserialize)]
pub struct TopupBody {
    pub amount: f64,
    pub payment_ref: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TopupResponse {
    pub transaction: WalletTransaction,
    pub balance_available: f64,
}

/// POST /v1/wallets/:id/topup: Credit a wallet.
pub async fn handle_topup(
    State(state): State<AppState>,
    Path(wallet_id): Path<Uuid>,
    Json(body): Json<TopupBody>,
) -> Result<Json<TopupResponse>, ApiError> {
    if !body.amount.is_finite() || body.amount <= 0.0 {
        return Err(bad_request("invalid_topup", "'amount' must be positive"));
    }
    if body.payment_ref.as_ref().is_some_and(|r| r.len() > MAX_FIELD_LEN) {
        return Err(bad_request("invalid_topup", "'payment_ref' exceeds maximum length"));
    }

    let transaction = state
        .ledger
        .topup(wallet_id, body.amount, body.payment_ref)
        .map_err(|e| domain_error(e.into()))?;
    let wallet = state
        .ledger
        .wallet(wallet_id)
        .map_err(|e| domain_error(e.into()))?;
    metrics::counter!("wallet.topups").increment(1);

    Ok(Json(TopupResponse {
        transaction,
        balance_available: wallet.balance_available,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub kind: Option<TransactionKind>,
    pub campaign_id: Option<Uuid>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub wallet_id: Uuid,
    pub transactions: Vec<WalletTransaction>,
}

/// GET /v1/wallets/:id/transactions: Newest first, optionally filtered.
pub async fn handle_transactions(
    State(state): State<AppState>,
    Path(wallet_id): Path<Uuid>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let filter = TransactionFilter {
        kind: query.kind,
        campaign_id: query.campaign_id,
        limit: Some(query.limit.unwrap_or(100).min(MAX_TRANSACTIONS_PAGE)),
    };
    let transactions = state
        .ledger
        .transactions(wallet_id, &filter)
        .map_err(|e| domain_error(e.into()))?;
    Ok(Json(TransactionsResponse {
        wallet_id,
        transactions,
    }))
}
