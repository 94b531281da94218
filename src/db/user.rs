use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;

/// One email-identified custodial wallet. `signing_key_id` is either the
/// `hot_wallet` sentinel or a custody-network token id; the public key and
/// chain address are always written together.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub verified: bool,
    #[serde(skip_serializing)]
    pub otp_code: Option<String>,
    pub wallet_public_key: Option<String>,
    pub wallet_address: Option<String>,
    pub signing_key_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    /// Create an unverified user pending OTP confirmation, or refresh the OTP
    /// on an existing unverified one.
    async fn upsert_pending(&self, email: &str, otp_code: &str) -> Result<User, StoreError>;
    /// Refresh the OTP without touching the verification flag (login/resend).
    async fn set_otp(&self, email: &str, otp_code: &str) -> Result<bool, StoreError>;
    /// Single-use OTP check: clears the code if and only if it matches.
    async fn consume_otp(&self, email: &str, otp_code: &str) -> Result<bool, StoreError>;
    /// Bind a minted wallet to the user and promote to verified. Public key,
    /// address and signing key id are set together, never independently.
    async fn attach_wallet(
        &self,
        email: &str,
        public_key: &str,
        address: &str,
        signing_key_id: &str,
    ) -> Result<(), StoreError>;
}

// Database repository
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        verified: row.try_get("verified")?,
        otp_code: row.try_get("otp_code")?,
        wallet_public_key: row.try_get("wallet_public_key")?,
        wallet_address: row.try_get("wallet_address")?,
        signing_key_id: row.try_get("signing_key_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SELECT_COLUMNS: &str = "id, email, verified, otp_code, wallet_public_key, wallet_address, \
     signing_key_id, created_at, updated_at";

#[async_trait]
impl UserStore for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM emailpay_users WHERE email = $1"
        ))
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_row).transpose().map_err(Into::into)
    }

    async fn upsert_pending(&self, email: &str, otp_code: &str) -> Result<User, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO emailpay_users (email, otp_code, verified) VALUES ($1, $2, FALSE) \
             ON CONFLICT (email) DO UPDATE \
             SET otp_code = EXCLUDED.otp_code, verified = FALSE, updated_at = NOW() \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(email.to_lowercase())
        .bind(otp_code)
        .fetch_one(&self.pool)
        .await?;

        map_row(&row).map_err(Into::into)
    }

    async fn set_otp(&self, email: &str, otp_code: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE emailpay_users SET otp_code = $2, updated_at = NOW() WHERE email = $1",
        )
        .bind(email.to_lowercase())
        .bind(otp_code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn consume_otp(&self, email: &str, otp_code: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE emailpay_users SET otp_code = NULL, updated_at = NOW() \
             WHERE email = $1 AND otp_code = $2",
        )
        .bind(email.to_lowercase())
        .bind(otp_code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn attach_wallet(
        &self,
        email: &str,
        public_key: &str,
        address: &str,
        signing_key_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE emailpay_users \
             SET wallet_public_key = $2, wallet_address = $3, signing_key_id = $4, \
                 verified = TRUE, otp_code = NULL, updated_at = NOW() \
             WHERE email = $1",
        )
        .bind(email.to_lowercase())
        .bind(public_key)
        .bind(address)
        .bind(signing_key_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
