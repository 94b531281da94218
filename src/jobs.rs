use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::asset::Asset;
use crate::chain::{self, ChainClient};
use crate::db::tx::TransactionStore;
use crate::db::user::UserStore;
use crate::email::EmailGateway;
use crate::engine::ExecutionEngine;
use crate::intent::{self, Intent};
use crate::scheduler::{JobHandler, JobQueue, JobResult};
use crate::wallet::WalletService;

pub const POLL_INBOX: &str = "poll-inbox";
pub const PROCESS_SEND: &str = "process-send";
pub const EXECUTE_TRANSACTION: &str = "execute-transaction";
pub const PROCESS_VERIFICATION: &str = "process-verification";
pub const PROCESS_BALANCE_CHECK: &str = "process-balance-check";
pub const EXPIRE_STALE: &str = "expire-stale-transactions";

/// Everything the job handlers share. One context is built at startup and
/// cloned into each handler.
pub struct JobContext {
    pub engine: Arc<ExecutionEngine>,
    pub wallets: Arc<WalletService>,
    pub txs: Arc<dyn TransactionStore>,
    pub users: Arc<dyn UserStore>,
    pub chain: Arc<dyn ChainClient>,
    pub mailer: Arc<dyn EmailGateway>,
    pub queue: JobQueue,
    pub token_address: Address,
}

#[derive(Deserialize)]
struct SendPayload {
    sender: String,
    amount: Decimal,
    asset: String,
    recipient: String,
    message_id: Option<String>,
}

#[derive(Deserialize)]
struct ExecutePayload {
    tx_id: Uuid,
}

#[derive(Deserialize)]
struct VerificationPayload {
    sender: String,
    code: String,
    message_id: Option<String>,
}

#[derive(Deserialize)]
struct BalancePayload {
    sender: String,
    message_id: Option<String>,
}

/// Fetch unread messages, parse each into an intent and fan out to the
/// matching job. Payment emails are trashed so the amount never lingers in
/// the inbox; everything else is just marked read.
pub struct PollInbox(pub Arc<JobContext>);

#[async_trait]
impl JobHandler for PollInbox {
    async fn run(&self, _payload: Value) -> JobResult {
        let ctx = &self.0;
        let messages = ctx.mailer.poll_new_messages().await?;
        if !messages.is_empty() {
            tracing::info!("processing {} new messages", messages.len());
        }

        for message in messages {
            let (Some(sender), Some(body)) = (message.sender.clone(), message.body.clone()) else {
                tracing::warn!("skipping malformed message {}", message.id);
                ctx.mailer.mark_read(&message.id).await?;
                continue;
            };

            match intent::parse(&body, &sender) {
                Some(Intent::Send {
                    amount,
                    asset,
                    recipient,
                }) => {
                    ctx.queue.run_now(
                        PROCESS_SEND,
                        json!({
                            "sender": sender,
                            "amount": amount,
                            "asset": asset,
                            "recipient": recipient,
                            "message_id": message.id,
                        }),
                    );
                    ctx.mailer.trash(&message.id).await?;
                }
                Some(Intent::Verify { code }) => {
                    ctx.queue.run_now(
                        PROCESS_VERIFICATION,
                        json!({
                            "sender": sender,
                            "code": code,
                            "message_id": message.id,
                        }),
                    );
                    ctx.mailer.mark_read(&message.id).await?;
                }
                Some(Intent::Balance) => {
                    ctx.queue.run_now(
                        PROCESS_BALANCE_CHECK,
                        json!({
                            "sender": sender,
                            "message_id": message.id,
                        }),
                    );
                    ctx.mailer.mark_read(&message.id).await?;
                }
                Some(Intent::Unknown { .. }) | None => {
                    ctx.mailer.mark_read(&message.id).await?;
                }
            }
        }
        Ok(())
    }
}

/// Validate the parsed payment and create the transaction record. A
/// rejection is final and replied to the sender; a created record is handed
/// straight to the executor.
pub struct ProcessSend(pub Arc<JobContext>);

#[async_trait]
impl JobHandler for ProcessSend {
    async fn run(&self, payload: Value) -> JobResult {
        let ctx = &self.0;
        let payload: SendPayload = serde_json::from_value(payload)?;

        let parsed = Intent::Send {
            amount: payload.amount,
            asset: payload.asset.clone(),
            recipient: payload.recipient.clone(),
        };
        if let Err(err) = intent::validate(&parsed, &payload.sender) {
            reply_rejection(ctx, &payload, &err.to_string()).await;
            return Ok(());
        }

        match ctx
            .engine
            .create(
                &payload.sender,
                &payload.recipient,
                payload.amount,
                &payload.asset,
                payload.message_id.as_deref(),
            )
            .await
        {
            Ok(tx) => {
                ctx.queue
                    .run_now(EXECUTE_TRANSACTION, json!({ "tx_id": tx.tx_id }));
            }
            Err(err) => reply_rejection(ctx, &payload, &err.to_string()).await,
        }
        Ok(())
    }
}

async fn reply_rejection(ctx: &JobContext, payload: &SendPayload, reason: &str) {
    tracing::warn!("payment from {} rejected: {reason}", payload.sender);
    let body = format!(
        "Your payment could not be processed.\n\n\
         Request: send {} {} to {}\n\
         Reason: {reason}",
        payload.amount, payload.asset, payload.recipient
    );
    if let Err(err) = ctx
        .mailer
        .send_reply(
            &payload.sender,
            "EmailPay: payment rejected",
            &body,
            payload.message_id.as_deref(),
        )
        .await
    {
        tracing::error!("failed to send rejection reply: {err}");
    }
}

/// Thin wrapper handing the record to the execution engine.
pub struct ExecuteTransaction(pub Arc<JobContext>);

#[async_trait]
impl JobHandler for ExecuteTransaction {
    async fn run(&self, payload: Value) -> JobResult {
        let payload: ExecutePayload = serde_json::from_value(payload)?;
        self.0.engine.execute(payload.tx_id).await?;
        Ok(())
    }
}

/// Complete a wallet verification started over the web: consume the emailed
/// code and reply with the outcome.
pub struct ProcessVerification(pub Arc<JobContext>);

#[async_trait]
impl JobHandler for ProcessVerification {
    async fn run(&self, payload: Value) -> JobResult {
        let ctx = &self.0;
        let payload: VerificationPayload = serde_json::from_value(payload)?;

        let (subject, body) = match ctx
            .wallets
            .verify_wallet(&payload.sender, &payload.code)
            .await
        {
            Ok(user) => {
                let address = user.wallet_address.unwrap_or_default();
                (
                    "EmailPay: wallet ready",
                    format!(
                        "Your wallet is verified and ready to use.\n\n\
                         Address: {address}\n\n\
                         You can now send payments by emailing, for example:\n\
                         send 5 PYUSD to friend@example.com"
                    ),
                )
            }
            Err(err) => (
                "EmailPay: verification failed",
                format!("Verification failed: {err}"),
            ),
        };

        if let Err(err) = ctx
            .mailer
            .send_reply(&payload.sender, subject, &body, payload.message_id.as_deref())
            .await
        {
            tracing::error!("failed to send verification reply: {err}");
        }
        Ok(())
    }
}

/// Look up both balances for the sender's wallet and reply with them.
pub struct ProcessBalanceCheck(pub Arc<JobContext>);

#[async_trait]
impl JobHandler for ProcessBalanceCheck {
    async fn run(&self, payload: Value) -> JobResult {
        let ctx = &self.0;
        let payload: BalancePayload = serde_json::from_value(payload)?;

        let wallet_address = ctx
            .users
            .find_by_email(&payload.sender)
            .await?
            .and_then(|user| user.wallet_address);

        let body = match wallet_address {
            Some(raw) => {
                let address = chain::parse_address(&raw)?;
                let native = ctx.chain.native_balance(address).await?;
                let token = ctx.chain.token_balance(ctx.token_address, address).await?;
                format!(
                    "Your wallet balances:\n\n\
                     {}: {}\n\
                     {}: {}\n\n\
                     Address: {raw}",
                    Asset::Eth.symbol(),
                    chain::format_units(native, Asset::Eth.decimals()),
                    Asset::Pyusd.symbol(),
                    chain::format_units(token, Asset::Pyusd.decimals()),
                )
            }
            None => "You don't have a wallet yet. Create one first to check balances."
                .to_string(),
        };

        ctx.mailer
            .send_reply(
                &payload.sender,
                "EmailPay: wallet balance",
                &body,
                payload.message_id.as_deref(),
            )
            .await?;
        Ok(())
    }
}

/// Recurring sweep: push every overdue pending record to expired and let the
/// senders know.
pub struct ExpireStale(pub Arc<JobContext>);

#[async_trait]
impl JobHandler for ExpireStale {
    async fn run(&self, _payload: Value) -> JobResult {
        let ctx = &self.0;
        let expired = ctx.txs.expire_stale(Utc::now()).await?;
        if expired.is_empty() {
            return Ok(());
        }

        tracing::info!("expired {} stale transactions", expired.len());
        for tx in expired {
            let body = format!(
                "Your transfer of {} {} to {} expired before it could be executed.\n\n\
                 Send a new payment email to try again.",
                tx.amount, tx.asset, tx.recipient_email
            );
            if let Err(err) = ctx
                .mailer
                .send_reply(
                    &tx.sender_email,
                    "EmailPay: transaction expired",
                    &body,
                    tx.source_message_id.as_deref(),
                )
                .await
            {
                tracing::error!("failed to send expiry notice for {}: {err}", tx.tx_id);
            }
        }
        Ok(())
    }
}

/// Register every handler against one shared context.
pub fn register_all(scheduler: &mut crate::scheduler::JobScheduler, ctx: Arc<JobContext>) {
    scheduler.define(POLL_INBOX, Arc::new(PollInbox(ctx.clone())));
    scheduler.define(PROCESS_SEND, Arc::new(ProcessSend(ctx.clone())));
    scheduler.define(EXECUTE_TRANSACTION, Arc::new(ExecuteTransaction(ctx.clone())));
    scheduler.define(PROCESS_VERIFICATION, Arc::new(ProcessVerification(ctx.clone())));
    scheduler.define(PROCESS_BALANCE_CHECK, Arc::new(ProcessBalanceCheck(ctx.clone())));
    scheduler.define(EXPIRE_STALE, Arc::new(ExpireStale(ctx)));
}
