use std::sync::Arc;

use alloy_primitives::Address;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::chain::{self, ChainClient, InclusionReceipt};
use crate::db::tx::{Transaction, TransactionStore};
use crate::db::user::UserStore;
use crate::email::EmailGateway;
use crate::error::{CreateError, EngineError};
use crate::signer::SignerResolver;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub chain_id: u64,
    pub token_address: Address,
    pub max_tx_amount: Decimal,
    pub daily_tx_cap: Decimal,
    pub tx_expiry_minutes: i64,
    pub confirmations: u64,
    pub explorer_base_url: String,
}

/// The transaction lifecycle state machine. Exclusively owns every mutation
/// of a transaction record after creation. Collaborators are injected so
/// tests can substitute doubles.
pub struct ExecutionEngine {
    txs: Arc<dyn TransactionStore>,
    users: Arc<dyn UserStore>,
    chain: Arc<dyn ChainClient>,
    signers: Arc<dyn SignerResolver>,
    mailer: Arc<dyn EmailGateway>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        txs: Arc<dyn TransactionStore>,
        users: Arc<dyn UserStore>,
        chain: Arc<dyn ChainClient>,
        signers: Arc<dyn SignerResolver>,
        mailer: Arc<dyn EmailGateway>,
        config: EngineConfig,
    ) -> Self {
        Self {
            txs,
            users,
            chain,
            signers,
            mailer,
            config,
        }
    }

    /// Validate both parties and persist a new pending transaction. The
    /// caller is responsible for enqueueing execution.
    pub async fn create(
        &self,
        sender_email: &str,
        recipient_email: &str,
        amount: Decimal,
        asset: &str,
        message_id: Option<&str>,
    ) -> Result<Transaction, CreateError> {
        let sender_email = sender_email.to_lowercase();
        let recipient_email = recipient_email.to_lowercase();

        if amount <= Decimal::ZERO {
            return Err(CreateError::NonPositiveAmount);
        }

        let sender = self.users.find_by_email(&sender_email).await?;
        if !sender.map(|user| user.verified).unwrap_or(false) {
            return Err(CreateError::SenderUnverified(sender_email));
        }

        let recipient = self.users.find_by_email(&recipient_email).await?;
        if !recipient.map(|user| user.verified).unwrap_or(false) {
            return Err(CreateError::RecipientUnverified(recipient_email));
        }

        if amount > self.config.max_tx_amount {
            return Err(CreateError::OverTxLimit {
                amount,
                limit: self.config.max_tx_amount,
            });
        }

        let since = Utc::now() - Duration::hours(24);
        let sent = self.txs.daily_total(&sender_email, since).await?;
        if sent + amount > self.config.daily_tx_cap {
            return Err(CreateError::OverDailyCap {
                cap: self.config.daily_tx_cap,
                sent,
            });
        }

        let tx = Transaction::new(
            &sender_email,
            &recipient_email,
            amount,
            asset,
            message_id,
            self.config.tx_expiry_minutes,
        );
        self.txs.insert(&tx).await?;

        tracing::info!(
            "transaction {} created: {} {} from {} to {}",
            tx.tx_id,
            tx.amount,
            tx.asset,
            tx.sender_email,
            tx.recipient_email
        );
        Ok(tx)
    }

    /// Drive one transaction to a terminal state. Idempotent: a record that
    /// is no longer pending cannot be claimed and the invocation is a logged
    /// no-op. Every failure is recorded on the record; only store errors
    /// while recording propagate to the job wrapper.
    pub async fn execute(&self, tx_id: Uuid) -> Result<(), EngineError> {
        let Some(tx) = self.txs.find(tx_id).await? else {
            tracing::error!("transaction {tx_id} not found");
            return Ok(());
        };

        if !self.txs.claim(tx_id).await? {
            tracing::warn!(
                "transaction {tx_id} already processed with status {}",
                tx.status
            );
            return Ok(());
        }

        if Utc::now() > tx.expires_at {
            self.txs.mark_expired(tx_id).await?;
            tracing::warn!("transaction {tx_id} expired");
            self.notify_expired(&tx).await;
            return Ok(());
        }

        match self.run_transfer(&tx).await {
            Ok(receipt) if receipt.success => {
                let hash = format!("{}", receipt.tx_hash);
                self.txs
                    .mark_completed(tx_id, &hash, receipt.block_number as i64)
                    .await?;
                tracing::info!("transaction {tx_id} completed: {hash}");
                self.notify_success(&tx, &hash, receipt.block_number).await;
            }
            Ok(_) => {
                let reason = EngineError::Reverted.to_string();
                self.txs.mark_failed(tx_id, &reason).await?;
                tracing::error!("transaction {tx_id} reverted on chain");
                self.notify_failure(&tx, &reason).await;
            }
            Err(err) => {
                let reason = err.to_string();
                self.txs.mark_failed(tx_id, &reason).await?;
                tracing::error!("transaction {tx_id} failed: {reason}");
                self.notify_failure(&tx, &reason).await;
            }
        }
        Ok(())
    }

    async fn run_transfer(&self, tx: &Transaction) -> Result<InclusionReceipt, EngineError> {
        let sender = self.users.find_by_email(&tx.sender_email).await?;
        let recipient = self.users.find_by_email(&tx.recipient_email).await?;

        let (Some(sender), Some(recipient)) = (sender, recipient) else {
            return Err(EngineError::WalletMissing);
        };
        let recipient_address = recipient
            .wallet_address
            .as_deref()
            .ok_or(EngineError::WalletMissing)?;
        let recipient_address = chain::parse_address(recipient_address)?;

        let request = chain::build_payment(
            tx,
            recipient_address,
            self.config.chain_id,
            self.config.token_address,
        )?;

        // misconfiguration surfaces here, before anything touches the chain
        let backend = self.signers.resolve(&sender)?;
        let tx_hash = backend.send_transaction(request).await?;
        tracing::info!("transaction {} submitted: {tx_hash}", tx.tx_id);

        let receipt = self
            .chain
            .wait_for_inclusion(tx_hash, self.config.confirmations)
            .await?;
        Ok(receipt)
    }

    async fn notify_success(&self, tx: &Transaction, tx_hash: &str, block_number: u64) {
        let explorer = format!("{}/tx/{tx_hash}", self.config.explorer_base_url);
        let body = format!(
            "Transaction successful!\n\n\
             Amount: {} {}\n\
             From: {}\n\
             To: {}\n\
             Transaction Hash: {tx_hash}\n\
             Block: {block_number}\n\
             Explorer: {explorer}\n\n\
             Your {} has been sent.",
            tx.amount, tx.asset, tx.sender_email, tx.recipient_email, tx.asset
        );
        let subject = format!(
            "EmailPay: {} {} sent to {}",
            tx.amount, tx.asset, tx.recipient_email
        );
        self.notify(tx, &subject, &body).await;
    }

    async fn notify_failure(&self, tx: &Transaction, reason: &str) {
        let body = format!(
            "Transaction failed.\n\n\
             Amount: {} {}\n\
             From: {}\n\
             To: {}\n\
             Error: {reason}\n\n\
             Please check your wallet and try again.",
            tx.amount, tx.asset, tx.sender_email, tx.recipient_email
        );
        self.notify(tx, "EmailPay: transaction failed", &body).await;
    }

    async fn notify_expired(&self, tx: &Transaction) {
        let body = format!(
            "Your transfer of {} {} to {} expired before it could be executed.\n\n\
             Send a new payment email to try again.",
            tx.amount, tx.asset, tx.recipient_email
        );
        self.notify(tx, "EmailPay: transaction expired", &body).await;
    }

    // Best-effort only: a failed reply never overrides the persisted status.
    async fn notify(&self, tx: &Transaction, subject: &str, body: &str) {
        if let Err(err) = self
            .mailer
            .send_reply(
                &tx.sender_email,
                subject,
                body,
                tx.source_message_id.as_deref(),
            )
            .await
        {
            tracing::error!("failed to send notification for {}: {err}", tx.tx_id);
        }
    }
}
