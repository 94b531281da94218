use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;

/// Lifecycle state of a payment attempt. `Processing` is the claim state a
/// single executor holds while it works; `Completed`, `Failed` and `Expired`
/// are terminal. Transitions are one-way and enforced by conditional updates
/// in the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Expired,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Processing => "processing",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
            TxStatus::Expired => "expired",
        }
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "processing" => Ok(TxStatus::Processing),
            "completed" => Ok(TxStatus::Completed),
            "failed" => Ok(TxStatus::Failed),
            "expired" => Ok(TxStatus::Expired),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub tx_id: Uuid,
    pub sender_email: String,
    pub recipient_email: String,
    pub amount: Decimal,
    pub asset: String,
    pub status: TxStatus,
    pub tx_hash: Option<String>,
    pub block_number: Option<i64>,
    pub error: Option<String>,
    pub source_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Build a fresh pending record; expiry is fixed at creation time.
    pub fn new(
        sender_email: &str,
        recipient_email: &str,
        amount: Decimal,
        asset: &str,
        source_message_id: Option<&str>,
        ttl_minutes: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            tx_id: Uuid::new_v4(),
            sender_email: sender_email.to_lowercase(),
            recipient_email: recipient_email.to_lowercase(),
            amount,
            asset: asset.to_uppercase(),
            status: TxStatus::Pending,
            tx_hash: None,
            block_number: None,
            error: None,
            source_message_id: source_message_id.map(|id| id.to_string()),
            created_at: now,
            expires_at: now + Duration::minutes(ttl_minutes),
            completed_at: None,
            failed_at: None,
        }
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError>;
    async fn find(&self, tx_id: Uuid) -> Result<Option<Transaction>, StoreError>;
    async fn find_for_user(
        &self,
        email: &str,
        status: Option<TxStatus>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError>;
    /// Sum of the sender's non-failed, non-expired amounts since `since`.
    async fn daily_total(&self, sender: &str, since: DateTime<Utc>) -> Result<Decimal, StoreError>;
    /// Atomically flip pending -> processing. Returns false when another
    /// executor already moved the record out of pending.
    async fn claim(&self, tx_id: Uuid) -> Result<bool, StoreError>;
    async fn mark_completed(
        &self,
        tx_id: Uuid,
        tx_hash: &str,
        block_number: i64,
    ) -> Result<bool, StoreError>;
    async fn mark_failed(&self, tx_id: Uuid, error: &str) -> Result<bool, StoreError>;
    /// Terminal transition for a claimed record found past its expiry.
    async fn mark_expired(&self, tx_id: Uuid) -> Result<bool, StoreError>;
    /// Sweep: mark every overdue pending or processing record expired,
    /// returning the rows that were transitioned. Overdue processing rows are
    /// claims abandoned by a crashed executor; reaping them here is the only
    /// way such a record reaches a terminal state.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<Transaction>, StoreError>;
}

// Database repository
pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_row(row: &PgRow) -> Result<Transaction, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = TxStatus::from_str(&status).map_err(|err| sqlx::Error::Decode(err.into()))?;

    Ok(Transaction {
        tx_id: row.try_get("tx_id")?,
        sender_email: row.try_get("sender_email")?,
        recipient_email: row.try_get("recipient_email")?,
        amount: row.try_get("amount")?,
        asset: row.try_get("asset")?,
        status,
        tx_hash: row.try_get("tx_hash")?,
        block_number: row.try_get("block_number")?,
        error: row.try_get("error")?,
        source_message_id: row.try_get("source_message_id")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        completed_at: row.try_get("completed_at")?,
        failed_at: row.try_get("failed_at")?,
    })
}

const SELECT_COLUMNS: &str = "tx_id, sender_email, recipient_email, amount, asset, status, \
     tx_hash, block_number, error, source_message_id, created_at, expires_at, completed_at, failed_at";

#[async_trait]
impl TransactionStore for PgTransactionRepository {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO emailpay_transactions
                (tx_id, sender_email, recipient_email, amount, asset, status,
                 source_message_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(tx.tx_id)
        .bind(&tx.sender_email)
        .bind(&tx.recipient_email)
        .bind(tx.amount)
        .bind(&tx.asset)
        .bind(tx.status.as_str())
        .bind(&tx.source_message_id)
        .bind(tx.created_at)
        .bind(tx.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, tx_id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM emailpay_transactions WHERE tx_id = $1"
        ))
        .bind(tx_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_row).transpose().map_err(Into::into)
    }

    async fn find_for_user(
        &self,
        email: &str,
        status: Option<TxStatus>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM emailpay_transactions \
                     WHERE (sender_email = $1 OR recipient_email = $1) AND status = $2 \
                     ORDER BY created_at DESC LIMIT $3"
                ))
                .bind(email)
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM emailpay_transactions \
                     WHERE sender_email = $1 OR recipient_email = $1 \
                     ORDER BY created_at DESC LIMIT $2"
                ))
                .bind(email)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(map_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    async fn daily_total(&self, sender: &str, since: DateTime<Utc>) -> Result<Decimal, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0) AS total FROM emailpay_transactions \
             WHERE sender_email = $1 AND created_at >= $2 \
             AND status IN ('pending', 'processing', 'completed')",
        )
        .bind(sender)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        row.try_get("total").map_err(Into::into)
    }

    async fn claim(&self, tx_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE emailpay_transactions SET status = 'processing', updated_at = NOW() \
             WHERE tx_id = $1 AND status = 'pending'",
        )
        .bind(tx_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(
        &self,
        tx_id: Uuid,
        tx_hash: &str,
        block_number: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE emailpay_transactions \
             SET status = 'completed', tx_hash = $2, block_number = $3, \
                 completed_at = NOW(), updated_at = NOW() \
             WHERE tx_id = $1 AND status = 'processing'",
        )
        .bind(tx_id)
        .bind(tx_hash)
        .bind(block_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, tx_id: Uuid, error: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE emailpay_transactions \
             SET status = 'failed', error = $2, failed_at = NOW(), updated_at = NOW() \
             WHERE tx_id = $1 AND status = 'processing'",
        )
        .bind(tx_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_expired(&self, tx_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE emailpay_transactions SET status = 'expired', updated_at = NOW() \
             WHERE tx_id = $1 AND status = 'processing'",
        )
        .bind(tx_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            "UPDATE emailpay_transactions SET status = 'expired', updated_at = NOW() \
             WHERE status IN ('pending', 'processing') AND expires_at < $1 \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(map_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }
}
