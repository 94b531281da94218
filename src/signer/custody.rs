use std::sync::Arc;

use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy_primitives::{hex, Address, B256};
use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SignerError;
use crate::signer::SigningBackend;

/// The single capability a session is ever scoped to.
pub const SIGN_CAPABILITY: &str = "custody:sign";

/// Signed authorization statement exchanged for session credentials.
#[derive(Debug, Clone, Serialize)]
pub struct SessionAuth {
    pub address: String,
    pub statement: String,
    pub signature: String,
}

/// Short-lived, capability-scoped credentials returned by the custody
/// network. Regenerated per signing operation, never cached past expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub session_token: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MintedWallet {
    pub public_key: String,
    pub token_id: String,
    pub address: String,
}

/// Key-custody network collaborator.
#[async_trait]
pub trait CustodyClient: Send + Sync {
    async fn negotiate_session(
        &self,
        auth: &SessionAuth,
        resource_id: &str,
        capability: &str,
    ) -> Result<SessionCredentials, SignerError>;

    async fn sign_and_send(
        &self,
        session: &SessionCredentials,
        public_key: &str,
        request: &TransactionRequest,
    ) -> Result<B256, SignerError>;

    async fn mint_wallet(&self, email: &str) -> Result<MintedWallet, SignerError>;
}

/// Human- and machine-verifiable statement binding the operator address, a
/// nonce, a bounded expiry and exactly one capability for one wallet
/// resource.
pub fn build_session_statement(
    address: Address,
    chain_id: u64,
    resource_id: &str,
    capability: &str,
    nonce: &str,
    issued_at: &str,
    expires_at: &str,
) -> String {
    format!(
        "emailpay.app wants you to sign in with your Ethereum account:\n\
         {address}\n\
         \n\
         Authorize capability {capability} for wallet resource {resource_id}\n\
         \n\
         URI: https://emailpay.app\n\
         Version: 1\n\
         Chain ID: {chain_id}\n\
         Nonce: {nonce}\n\
         Issued At: {issued_at}\n\
         Expiration Time: {expires_at}"
    )
}

/// Signs through the custody network using per-operation session
/// credentials.
pub struct CustodySession {
    resource_id: String,
    public_key: String,
    address: Address,
    client: Arc<dyn CustodyClient>,
    operator_key: PrivateKeySigner,
    chain_id: u64,
    session_ttl_hours: i64,
}

impl CustodySession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resource_id: String,
        public_key: String,
        address: Address,
        client: Arc<dyn CustodyClient>,
        operator_key: PrivateKeySigner,
        chain_id: u64,
        session_ttl_hours: i64,
    ) -> Self {
        Self {
            resource_id,
            public_key,
            address,
            client,
            operator_key,
            chain_id,
            session_ttl_hours,
        }
    }

    async fn authorize(&self) -> Result<SessionCredentials, SignerError> {
        let now = Utc::now();
        let nonce = Uuid::new_v4().simple().to_string();
        let statement = build_session_statement(
            self.operator_key.address(),
            self.chain_id,
            &self.resource_id,
            SIGN_CAPABILITY,
            &nonce,
            &now.to_rfc3339_opts(SecondsFormat::Secs, true),
            &(now + Duration::hours(self.session_ttl_hours))
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        let signature = self
            .operator_key
            .sign_message(statement.as_bytes())
            .await
            .map_err(|err| SignerError::Session(err.to_string()))?;

        let auth = SessionAuth {
            address: format!("{}", self.operator_key.address()),
            statement,
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
        };

        self.client
            .negotiate_session(&auth, &self.resource_id, SIGN_CAPABILITY)
            .await
    }
}

#[async_trait]
impl SigningBackend for CustodySession {
    fn address(&self) -> Address {
        self.address
    }

    async fn send_transaction(&self, request: TransactionRequest) -> Result<B256, SignerError> {
        let session = self.authorize().await?;
        self.client
            .sign_and_send(&session, &self.public_key, &request)
            .await
    }
}

/// HTTP client for the custody relay.
pub struct RelayCustodyClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RelayCustodyClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }
        builder
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SignerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SignerError::Custody(format!(
            "relay returned {status}: {body}"
        )))
    }
}

#[derive(Serialize)]
struct NegotiateRequest<'a> {
    auth: &'a SessionAuth,
    resource_id: &'a str,
    capability: &'a str,
}

#[derive(Serialize)]
struct SignAndSendRequest<'a> {
    session_token: &'a str,
    public_key: &'a str,
    transaction: &'a TransactionRequest,
}

#[derive(Deserialize)]
struct SignAndSendResponse {
    tx_hash: B256,
}

#[async_trait]
impl CustodyClient for RelayCustodyClient {
    async fn negotiate_session(
        &self,
        auth: &SessionAuth,
        resource_id: &str,
        capability: &str,
    ) -> Result<SessionCredentials, SignerError> {
        let response = self
            .request("/v1/sessions")
            .json(&NegotiateRequest {
                auth,
                resource_id,
                capability,
            })
            .send()
            .await
            .map_err(|err| SignerError::Session(err.to_string()))?;

        Self::check(response)
            .await?
            .json::<SessionCredentials>()
            .await
            .map_err(|err| SignerError::Session(err.to_string()))
    }

    async fn sign_and_send(
        &self,
        session: &SessionCredentials,
        public_key: &str,
        request: &TransactionRequest,
    ) -> Result<B256, SignerError> {
        let response = self
            .request("/v1/wallets/sign-and-send")
            .json(&SignAndSendRequest {
                session_token: &session.session_token,
                public_key,
                transaction: request,
            })
            .send()
            .await
            .map_err(|err| SignerError::Custody(err.to_string()))?;

        let body = Self::check(response)
            .await?
            .json::<SignAndSendResponse>()
            .await
            .map_err(|err| SignerError::Custody(err.to_string()))?;
        Ok(body.tx_hash)
    }

    async fn mint_wallet(&self, email: &str) -> Result<MintedWallet, SignerError> {
        let response = self
            .request("/v1/wallets/mint")
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await
            .map_err(|err| SignerError::Custody(err.to_string()))?;

        Self::check(response)
            .await?
            .json::<MintedWallet>()
            .await
            .map_err(|err| SignerError::Custody(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_binds_resource_and_capability() {
        let statement = build_session_statement(
            Address::repeat_byte(1),
            11155111,
            "abc123",
            SIGN_CAPABILITY,
            "nonce-1",
            "2026-01-01T00:00:00Z",
            "2026-01-01T01:00:00Z",
        );
        assert!(statement.contains("custody:sign"));
        assert!(statement.contains("wallet resource abc123"));
        assert!(statement.contains("Nonce: nonce-1"));
        assert!(statement.contains("Chain ID: 11155111"));
        assert!(statement.contains("Expiration Time: 2026-01-01T01:00:00Z"));
    }
}
