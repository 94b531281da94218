use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::tx::{TransactionStore, TxStatus};

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
struct HistoryParams {
    status: Option<String>,
    limit: Option<i64>,
}

// return a single transaction by its id
async fn get_transaction(
    State(txs): State<Arc<dyn TransactionStore>>,
    Path(tx_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    let transaction = match txs.find(tx_id).await {
        Ok(Some(transaction)) => transaction,
        Ok(None) => {
            return Err((StatusCode::NOT_FOUND, "Transaction not found"));
        }
        Err(err) => {
            tracing::error!("Failed to retrieve transaction {tx_id}: {err}");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve transaction",
            ));
        }
    };

    Ok((StatusCode::OK, Json(transaction)))
}

// return a user's transaction history, newest first, optionally filtered by
// status
async fn list_transactions(
    State(txs): State<Arc<dyn TransactionStore>>,
    Path(email): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    let status = match params.status.as_deref() {
        Some(raw) => match TxStatus::from_str(raw) {
            Ok(status) => Some(status),
            Err(err) => {
                tracing::warn!("rejected history request: {err}");
                return Err((StatusCode::BAD_REQUEST, "Invalid status filter"));
            }
        },
        None => None,
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let transactions = match txs
        .find_for_user(&email.to_lowercase(), status, limit)
        .await
    {
        Ok(transactions) => transactions,
        Err(err) => {
            tracing::error!("Failed to retrieve transactions for {email}: {err}");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve transactions",
            ));
        }
    };

    Ok((StatusCode::OK, Json(transactions)))
}

pub fn tx_route(txs: Arc<dyn TransactionStore>) -> Router {
    Router::new()
        .route("/tx/:tx_id", get(get_transaction))
        .route("/tx/user/:email", get(list_transactions))
        .with_state(txs)
}
