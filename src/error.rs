use alloy_primitives::Address;
use rust_decimal::Decimal;
use thiserror::Error;

/// Rejections produced by the intent validator before any record exists.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid amount")]
    InvalidAmount,

    #[error("recipient email not found")]
    MissingRecipient,

    #[error("cannot send to yourself")]
    SelfTransfer,

    #[error("unsupported asset: {0}")]
    UnsupportedAsset(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Signing backend failures. Address mismatch and test-only credentials are
/// configuration errors and never retryable; session and custody errors are
/// infrastructure failures surfaced on the transaction record.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("hot wallet address mismatch: expected {expected}, derived {derived}")]
    AddressMismatch { expected: Address, derived: Address },

    #[error("signing key id is a test-only placeholder and cannot sign on the custody network")]
    TestOnlyCredential,

    #[error("wallet address is not set or malformed")]
    MalformedAddress,

    #[error("signing key id is not set")]
    MissingCredential,

    #[error("session negotiation failed: {0}")]
    Session(String),

    #[error("custody network error: {0}")]
    Custody(String),

    #[error("rpc error: {0}")]
    Rpc(String),
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("malformed on-chain address: {0}")]
    BadAddress(String),
}

/// Preconditions checked before a transaction record is created.
#[derive(Debug, Error)]
pub enum CreateError {
    #[error("sender {0} not found or not verified")]
    SenderUnverified(String),

    #[error("recipient {0} not found or not verified")]
    RecipientUnverified(String),

    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("amount {amount} exceeds per-transaction limit {limit}")]
    OverTxLimit { amount: Decimal, limit: Decimal },

    #[error("daily transfer cap {cap} exceeded (sent {sent} in the last 24h)")]
    OverDailyCap { cap: Decimal, sent: Decimal },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures inside the execute path. Every variant is recorded on the
/// transaction record and logged; none escape to the scheduler.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported asset: {0}")]
    UnsupportedAsset(String),

    #[error("sender or recipient wallet not found")]
    WalletMissing,

    #[error("amount cannot be represented in base units")]
    AmountOverflow,

    #[error("transaction reverted")]
    Reverted,

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("mail api error: {0}")]
    Api(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet already exists for this email, use login instead")]
    AlreadyExists,

    #[error("user not found")]
    NotFound,

    #[error("invalid verification code")]
    InvalidOtp,

    #[error("wallet not provisioned, create a wallet first")]
    WalletMissing,

    #[error("custody network error: {0}")]
    Custody(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
