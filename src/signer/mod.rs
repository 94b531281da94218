pub mod custody;
pub mod hot_wallet;

use std::sync::Arc;

use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;

use crate::db::user::User;
use crate::error::SignerError;
use custody::{CustodyClient, CustodySession};
use hot_wallet::HotWallet;

/// Sentinel signing-key id marking a wallet signed by the operator-held key
/// instead of a custody-network credential.
pub const HOT_WALLET_KEY_ID: &str = "hot_wallet";

/// A real custody token id is at least this many hex chars once the 0x
/// prefix is stripped; anything shorter is a placeholder that never existed
/// on the custody network.
const MIN_CUSTODY_KEY_LEN: usize = 64;

/// Something able to produce a signed, broadcastable transaction for one
/// wallet.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    fn address(&self) -> Address;
    async fn send_transaction(&self, request: TransactionRequest) -> Result<B256, SignerError>;
}

/// Seam for the execution engine: resolve a user record to a signing
/// backend.
pub trait SignerResolver: Send + Sync {
    fn resolve(&self, user: &User) -> Result<Box<dyn SigningBackend>, SignerError>;
}

pub struct SignerSelector {
    operator_key: PrivateKeySigner,
    custody: Arc<dyn CustodyClient>,
    rpc_url: String,
    chain_id: u64,
    session_ttl_hours: i64,
}

impl SignerSelector {
    pub fn new(
        operator_key: PrivateKeySigner,
        custody: Arc<dyn CustodyClient>,
        rpc_url: String,
        chain_id: u64,
        session_ttl_hours: i64,
    ) -> Self {
        Self {
            operator_key,
            custody,
            rpc_url,
            chain_id,
            session_ttl_hours,
        }
    }
}

impl SignerResolver for SignerSelector {
    fn resolve(&self, user: &User) -> Result<Box<dyn SigningBackend>, SignerError> {
        let recorded_address = user
            .wallet_address
            .as_deref()
            .and_then(|raw| raw.parse::<Address>().ok())
            .ok_or(SignerError::MalformedAddress)?;
        let key_id = user
            .signing_key_id
            .as_deref()
            .ok_or(SignerError::MissingCredential)?;

        if key_id == HOT_WALLET_KEY_ID {
            let backend = HotWallet::connect(self.operator_key.clone(), &self.rpc_url)?;
            if backend.address() != recorded_address {
                return Err(SignerError::AddressMismatch {
                    expected: recorded_address,
                    derived: backend.address(),
                });
            }
            tracing::info!("using hot wallet signing for {}", user.email);
            return Ok(Box::new(backend));
        }

        // Short ids are deterministic test stand-ins, not minted credentials;
        // refuse before any network call.
        let resource_id = key_id.trim_start_matches("0x");
        if resource_id.len() < MIN_CUSTODY_KEY_LEN {
            return Err(SignerError::TestOnlyCredential);
        }

        let public_key = user
            .wallet_public_key
            .clone()
            .ok_or(SignerError::MissingCredential)?;

        tracing::info!("using custody session signing for {}", user.email);
        Ok(Box::new(CustodySession::new(
            resource_id.to_string(),
            public_key,
            recorded_address,
            self.custody.clone(),
            self.operator_key.clone(),
            self.chain_id,
            self.session_ttl_hours,
        )))
    }
}
