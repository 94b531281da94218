use std::sync::Arc;

use alloy::network::EthereumWallet;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;

use crate::chain::BoxedProvider;
use crate::error::SignerError;
use crate::signer::SigningBackend;

/// Signs with the single operator-held private key. The caller is
/// responsible for checking that the derived address matches the wallet
/// record before use.
pub struct HotWallet {
    address: Address,
    provider: BoxedProvider,
}

impl HotWallet {
    pub fn connect(signer: PrivateKeySigner, rpc_url: &str) -> Result<Self, SignerError> {
        let url: reqwest::Url = rpc_url
            .parse()
            .map_err(|err| SignerError::Rpc(format!("invalid RPC URL: {err}")))?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);
        Ok(Self {
            address,
            provider: Arc::new(provider),
        })
    }
}

#[async_trait]
impl SigningBackend for HotWallet {
    fn address(&self) -> Address {
        self.address
    }

    async fn send_transaction(&self, request: TransactionRequest) -> Result<B256, SignerError> {
        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|err| SignerError::Rpc(err.to_string()))?;
        Ok(*pending.tx_hash())
    }
}
