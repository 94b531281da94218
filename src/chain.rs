use std::sync::Arc;
use std::time::Duration;

use alloy::network::{Ethereum, TransactionBuilder};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::asset::Asset;
use crate::db::tx::Transaction;
use crate::error::{ChainError, EngineError};

sol! {
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
    }
}

/// Outcome of an included transaction.
#[derive(Debug, Clone, Copy)]
pub struct InclusionReceipt {
    pub success: bool,
    pub tx_hash: B256,
    pub block_number: u64,
}

/// Read-only chain collaborator. Submission goes through a signing backend;
/// everything here is unauthenticated RPC.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn head_block(&self) -> Result<u64, ChainError>;
    async fn native_balance(&self, address: Address) -> Result<U256, ChainError>;
    async fn token_balance(&self, token: Address, address: Address) -> Result<U256, ChainError>;
    /// Poll until the transaction is included and buried under the requested
    /// number of confirmations. No overall timeout: a hung RPC holds the job
    /// slot, matching the cooperative scheduling model.
    async fn wait_for_inclusion(
        &self,
        tx_hash: B256,
        confirmations: u64,
    ) -> Result<InclusionReceipt, ChainError>;
}

pub type BoxedProvider = Arc<dyn Provider<Ethereum> + Send + Sync>;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub struct RpcChainClient {
    provider: BoxedProvider,
}

impl RpcChainClient {
    pub fn connect(rpc_url: &str) -> Result<Self, ChainError> {
        let url: reqwest::Url = rpc_url
            .parse()
            .map_err(|err| ChainError::Rpc(format!("invalid RPC URL: {err}")))?;
        let provider = ProviderBuilder::new().connect_http(url);
        Ok(Self {
            provider: Arc::new(provider),
        })
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn head_block(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|err| ChainError::Rpc(err.to_string()))
    }

    async fn native_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|err| ChainError::Rpc(err.to_string()))
    }

    async fn token_balance(&self, token: Address, address: Address) -> Result<U256, ChainError> {
        let call = IERC20::balanceOfCall { account: address };
        let request = TransactionRequest::default()
            .with_to(token)
            .with_input(call.abi_encode());

        let output = self
            .provider
            .call(request)
            .await
            .map_err(|err| ChainError::Rpc(err.to_string()))?;

        IERC20::balanceOfCall::abi_decode_returns(&output)
            .map_err(|err| ChainError::Rpc(format!("balanceOf decode failed: {err}")))
    }

    async fn wait_for_inclusion(
        &self,
        tx_hash: B256,
        confirmations: u64,
    ) -> Result<InclusionReceipt, ChainError> {
        let receipt = loop {
            let receipt = self
                .provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|err| ChainError::Rpc(err.to_string()))?;
            match receipt {
                Some(receipt) => break receipt,
                None => tokio::time::sleep(RECEIPT_POLL_INTERVAL).await,
            }
        };

        let block_number = receipt
            .block_number
            .ok_or_else(|| ChainError::Rpc("receipt missing block number".to_string()))?;

        // inclusion itself counts as the first confirmation
        let target = block_number + confirmations.saturating_sub(1);
        loop {
            let head = self.head_block().await?;
            if head >= target {
                break;
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }

        Ok(InclusionReceipt {
            success: receipt.status(),
            tx_hash,
            block_number,
        })
    }
}

pub fn parse_address(raw: &str) -> Result<Address, ChainError> {
    raw.parse::<Address>()
        .map_err(|_| ChainError::BadAddress(raw.to_string()))
}

/// Convert a decimal amount to on-chain base units for the asset.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<U256, EngineError> {
    let scale = Decimal::from(10u64.pow(decimals));
    let scaled = amount
        .checked_mul(scale)
        .ok_or(EngineError::AmountOverflow)?
        .trunc();
    let units = scaled.to_u128().ok_or(EngineError::AmountOverflow)?;
    Ok(U256::from(units))
}

/// Render base units as a decimal string, trimming trailing zeros.
pub fn format_units(value: U256, decimals: u32) -> String {
    let base = U256::from(10u64).pow(U256::from(decimals));
    let integer = value / base;
    let fraction = value % base;
    if fraction.is_zero() {
        return integer.to_string();
    }
    let padded = format!("{fraction:0>width$}", width = decimals as usize);
    format!("{integer}.{}", padded.trim_end_matches('0'))
}

/// Build the chain-specific payload for a payment: native value transfer for
/// ETH, ABI-encoded `transfer(to, amount)` against the token contract for the
/// stablecoin.
pub fn build_payment(
    tx: &Transaction,
    recipient: Address,
    chain_id: u64,
    token: Address,
) -> Result<TransactionRequest, EngineError> {
    let asset =
        Asset::from_symbol(&tx.asset).ok_or_else(|| EngineError::UnsupportedAsset(tx.asset.clone()))?;
    let amount = to_base_units(tx.amount, asset.decimals())?;

    let request = match asset {
        Asset::Eth => TransactionRequest::default()
            .with_chain_id(chain_id)
            .with_to(recipient)
            .with_value(amount),
        Asset::Pyusd => {
            let call = IERC20::transferCall {
                to: recipient,
                amount,
            };
            TransactionRequest::default()
                .with_chain_id(chain_id)
                .with_to(token)
                .with_value(U256::ZERO)
                .with_input(call.abi_encode())
        }
    };

    Ok(request)
}
