//! In-memory doubles shared by the unit tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use alloy::rpc::types::TransactionRequest;
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::chain::{ChainClient, InclusionReceipt};
use crate::db::tx::{Transaction, TransactionStore, TxStatus};
use crate::db::user::{User, UserStore};
use crate::email::{EmailGateway, InboundMessage};
use crate::engine::EngineConfig;
use crate::error::{ChainError, EmailError, SignerError, StoreError};
use crate::signer::custody::{
    CustodyClient, MintedWallet, SessionAuth, SessionCredentials,
};
use crate::signer::{SignerResolver, SigningBackend};

pub fn test_user(email: &str) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        email: email.to_lowercase(),
        verified: false,
        otp_code: None,
        wallet_public_key: None,
        wallet_address: None,
        signing_key_id: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn verified_user(email: &str) -> User {
    let mut user = test_user(email);
    user.verified = true;
    user.wallet_public_key = Some("0x04aabbcc".to_string());
    user.wallet_address = Some(format!("{}", Address::repeat_byte(0x42)));
    user.signing_key_id = Some(format!("0x{}", "cd".repeat(32)));
    user
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        chain_id: 11155111,
        token_address: Address::repeat_byte(0xAA),
        max_tx_amount: Decimal::from(100),
        daily_tx_cap: Decimal::from(500),
        tx_expiry_minutes: 30,
        confirmations: 1,
        explorer_base_url: "https://sepolia.etherscan.io".to_string(),
    }
}

#[derive(Default)]
pub struct MemoryTransactionStore {
    inner: Mutex<HashMap<Uuid, Transaction>>,
}

impl MemoryTransactionStore {
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn get(&self, tx_id: Uuid) -> Transaction {
        self.inner.lock().unwrap().get(&tx_id).cloned().unwrap()
    }

    pub fn seed(&self, tx: Transaction) {
        self.inner.lock().unwrap().insert(tx.tx_id, tx);
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError> {
        self.inner.lock().unwrap().insert(tx.tx_id, tx.clone());
        Ok(())
    }

    async fn find(&self, tx_id: Uuid) -> Result<Option<Transaction>, StoreError> {
        Ok(self.inner.lock().unwrap().get(&tx_id).cloned())
    }

    async fn find_for_user(
        &self,
        email: &str,
        status: Option<TxStatus>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut matches: Vec<Transaction> = self
            .inner
            .lock()
            .unwrap()
            .values()
            .filter(|tx| tx.sender_email == email || tx.recipient_email == email)
            .filter(|tx| status.map(|wanted| tx.status == wanted).unwrap_or(true))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn daily_total(&self, sender: &str, since: DateTime<Utc>) -> Result<Decimal, StoreError> {
        let total = self
            .inner
            .lock()
            .unwrap()
            .values()
            .filter(|tx| tx.sender_email == sender && tx.created_at >= since)
            .filter(|tx| {
                matches!(
                    tx.status,
                    TxStatus::Pending | TxStatus::Processing | TxStatus::Completed
                )
            })
            .map(|tx| tx.amount)
            .sum();
        Ok(total)
    }

    async fn claim(&self, tx_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(&tx_id) {
            Some(tx) if tx.status == TxStatus::Pending => {
                tx.status = TxStatus::Processing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_completed(
        &self,
        tx_id: Uuid,
        tx_hash: &str,
        block_number: i64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(&tx_id) {
            Some(tx) if tx.status == TxStatus::Processing => {
                tx.status = TxStatus::Completed;
                tx.tx_hash = Some(tx_hash.to_string());
                tx.block_number = Some(block_number);
                tx.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, tx_id: Uuid, error: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(&tx_id) {
            Some(tx) if tx.status == TxStatus::Processing => {
                tx.status = TxStatus::Failed;
                tx.error = Some(error.to_string());
                tx.failed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_expired(&self, tx_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(&tx_id) {
            Some(tx) if tx.status == TxStatus::Processing => {
                tx.status = TxStatus::Expired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<Transaction>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut expired = Vec::new();
        for tx in inner.values_mut() {
            if matches!(tx.status, TxStatus::Pending | TxStatus::Processing)
                && tx.expires_at < now
            {
                tx.status = TxStatus::Expired;
                expired.push(tx.clone());
            }
        }
        Ok(expired)
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn add(&self, user: User) {
        self.inner.lock().unwrap().insert(user.email.clone(), user);
    }

    pub fn get(&self, email: &str) -> User {
        self.inner.lock().unwrap().get(email).cloned().unwrap()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().unwrap().get(&email.to_lowercase()).cloned())
    }

    async fn upsert_pending(&self, email: &str, otp_code: &str) -> Result<User, StoreError> {
        let email = email.to_lowercase();
        let mut inner = self.inner.lock().unwrap();
        let user = inner.entry(email.clone()).or_insert_with(|| test_user(&email));
        user.otp_code = Some(otp_code.to_string());
        user.verified = false;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_otp(&self, email: &str, otp_code: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(&email.to_lowercase()) {
            Some(user) => {
                user.otp_code = Some(otp_code.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn consume_otp(&self, email: &str, otp_code: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(&email.to_lowercase()) {
            Some(user) if user.otp_code.as_deref() == Some(otp_code) => {
                user.otp_code = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn attach_wallet(
        &self,
        email: &str,
        public_key: &str,
        address: &str,
        signing_key_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.get_mut(&email.to_lowercase()) {
            user.wallet_public_key = Some(public_key.to_string());
            user.wallet_address = Some(address.to_string());
            user.signing_key_id = Some(signing_key_id.to_string());
            user.verified = true;
            user.otp_code = None;
            user.updated_at = Utc::now();
        }
        Ok(())
    }
}

pub struct MockChainClient {
    succeed: bool,
    waits: AtomicUsize,
    native: Mutex<U256>,
    token: Mutex<U256>,
}

impl MockChainClient {
    pub fn succeeding() -> Self {
        Self {
            succeed: true,
            waits: AtomicUsize::new(0),
            native: Mutex::new(U256::ZERO),
            token: Mutex::new(U256::ZERO),
        }
    }

    pub fn reverting() -> Self {
        Self {
            succeed: false,
            ..Self::succeeding()
        }
    }

    pub fn inclusion_waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }

    pub fn set_native_balance(&self, value: U256) {
        *self.native.lock().unwrap() = value;
    }

    pub fn set_token_balance(&self, value: U256) {
        *self.token.lock().unwrap() = value;
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn head_block(&self) -> Result<u64, ChainError> {
        Ok(100)
    }

    async fn native_balance(&self, _address: Address) -> Result<U256, ChainError> {
        Ok(*self.native.lock().unwrap())
    }

    async fn token_balance(&self, _token: Address, _address: Address) -> Result<U256, ChainError> {
        Ok(*self.token.lock().unwrap())
    }

    async fn wait_for_inclusion(
        &self,
        tx_hash: B256,
        _confirmations: u64,
    ) -> Result<InclusionReceipt, ChainError> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        Ok(InclusionReceipt {
            success: self.succeed,
            tx_hash,
            block_number: 100,
        })
    }
}

/// Gateway double: scripted inbox plus records of every state change and
/// reply.
#[derive(Default)]
pub struct RecordingMailer {
    inbox: Mutex<Vec<InboundMessage>>,
    read: Mutex<Vec<String>>,
    trashed: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, String, String, Option<String>)>>,
}

impl RecordingMailer {
    pub fn queue_message(&self, message: InboundMessage) {
        self.inbox.lock().unwrap().push(message);
    }

    /// Replies recorded as (to, subject, body, in_reply_to).
    pub fn sent(&self) -> Vec<(String, String, String, Option<String>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn read_ids(&self) -> Vec<String> {
        self.read.lock().unwrap().clone()
    }

    pub fn trashed_ids(&self) -> Vec<String> {
        self.trashed.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailGateway for RecordingMailer {
    async fn poll_new_messages(&self) -> Result<Vec<InboundMessage>, EmailError> {
        Ok(self.inbox.lock().unwrap().drain(..).collect())
    }

    async fn mark_read(&self, id: &str) -> Result<(), EmailError> {
        self.read.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn trash(&self, id: &str) -> Result<(), EmailError> {
        self.trashed.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn send_reply(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
    ) -> Result<(), EmailError> {
        self.sent.lock().unwrap().push((
            to.to_string(),
            subject.to_string(),
            body.to_string(),
            in_reply_to.map(str::to_string),
        ));
        Ok(())
    }
}

pub struct StaticSigner {
    address: Address,
}

#[async_trait]
impl SigningBackend for StaticSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn send_transaction(&self, _request: TransactionRequest) -> Result<B256, SignerError> {
        Ok(B256::repeat_byte(0x42))
    }
}

/// Resolver that always hands out a signer returning a fixed hash.
pub struct StaticResolver {
    pub address: Address,
}

impl Default for StaticResolver {
    fn default() -> Self {
        Self {
            address: Address::repeat_byte(9),
        }
    }
}

impl SignerResolver for StaticResolver {
    fn resolve(&self, _user: &User) -> Result<Box<dyn SigningBackend>, SignerError> {
        Ok(Box::new(StaticSigner {
            address: self.address,
        }))
    }
}

/// Resolver that fails every resolution with the produced error.
pub struct FailingResolver(pub fn() -> SignerError);

impl SignerResolver for FailingResolver {
    fn resolve(&self, _user: &User) -> Result<Box<dyn SigningBackend>, SignerError> {
        Err((self.0)())
    }
}

#[derive(Default)]
pub struct MockCustodyClient {
    fail_mint: bool,
    minted: Mutex<Vec<String>>,
}

impl MockCustodyClient {
    pub fn failing_mint() -> Self {
        Self {
            fail_mint: true,
            ..Self::default()
        }
    }

    pub fn minted_for(&self) -> Vec<String> {
        self.minted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CustodyClient for MockCustodyClient {
    async fn negotiate_session(
        &self,
        _auth: &SessionAuth,
        _resource_id: &str,
        _capability: &str,
    ) -> Result<SessionCredentials, SignerError> {
        Ok(SessionCredentials {
            session_token: "session-token".to_string(),
            expires_at: (Utc::now() + Duration::hours(1)).to_rfc3339(),
        })
    }

    async fn sign_and_send(
        &self,
        _session: &SessionCredentials,
        _public_key: &str,
        _request: &TransactionRequest,
    ) -> Result<B256, SignerError> {
        Ok(B256::repeat_byte(0x42))
    }

    async fn mint_wallet(&self, email: &str) -> Result<MintedWallet, SignerError> {
        if self.fail_mint {
            return Err(SignerError::Custody("mint unavailable".to_string()));
        }
        self.minted.lock().unwrap().push(email.to_string());
        Ok(MintedWallet {
            public_key: "0x04ddeeff".to_string(),
            token_id: format!("0x{}", "ef".repeat(32)),
            address: format!("{}", Address::repeat_byte(0x77)),
        })
    }
}
