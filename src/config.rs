use alloy_primitives::Address;
use rust_decimal::Decimal;

/// Runtime configuration, loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    // mandatory fields
    pub database_url: String,
    pub rpc_url: String,
    pub pyusd_address: Address,
    pub hot_wallet_private_key: String,
    pub custody_relay_url: String,
    pub gmail_client_id: String,
    pub gmail_client_secret: String,
    pub gmail_refresh_token: String,
    // optional fields
    pub port: u16,
    pub log_file: String,
    pub max_connection_pooling: u32,
    pub chain_id: u64,
    pub max_tx_amount: Decimal,
    pub daily_tx_cap: Decimal,
    pub tx_expiry_minutes: i64,
    pub tx_confirmations: u64,
    pub session_ttl_hours: i64,
    pub custody_relay_api_key: Option<String>,
    pub gmail_poll_query: String,
    pub poll_interval_secs: u64,
    pub expiry_sweep_interval_secs: u64,
    pub explorer_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = require("DATABASE_URL")?;
        let rpc_url = require("RPC_URL")?;
        let pyusd_address = require("PYUSD_ADDRESS")?
            .parse::<Address>()
            .map_err(|err| format!("PYUSD_ADDRESS is not a valid address: {err}"))?;
        let hot_wallet_private_key = require("HOT_WALLET_PRIVATE_KEY")?;
        let custody_relay_url = require("CUSTODY_RELAY_URL")?;
        let gmail_client_id = require("GMAIL_CLIENT_ID")?;
        let gmail_client_secret = require("GMAIL_CLIENT_SECRET")?;
        let gmail_refresh_token = require("GMAIL_REFRESH_TOKEN")?;

        Ok(Self {
            database_url,
            rpc_url,
            pyusd_address,
            hot_wallet_private_key,
            custody_relay_url,
            gmail_client_id,
            gmail_client_secret,
            gmail_refresh_token,
            port: optional("PORT", 3000)?,
            log_file: dotenv::var("LOG_FILE").unwrap_or("app.log".to_string()),
            max_connection_pooling: optional("MAX_CONNECTION_POOLING", 5)?,
            chain_id: optional("CHAIN_ID", 11155111)?,
            max_tx_amount: optional("MAX_TX_AMOUNT", Decimal::from(100))?,
            daily_tx_cap: optional("DAILY_TX_CAP", Decimal::from(500))?,
            tx_expiry_minutes: optional("TX_EXPIRY_MINUTES", 30)?,
            tx_confirmations: optional("TX_CONFIRMATIONS", 6)?,
            session_ttl_hours: optional("SESSION_TTL_HOURS", 1)?,
            custody_relay_api_key: dotenv::var("CUSTODY_RELAY_API_KEY").ok(),
            gmail_poll_query: dotenv::var("GMAIL_POLL_QUERY")
                .unwrap_or("in:inbox is:unread".to_string()),
            poll_interval_secs: optional("POLL_INTERVAL_SECS", 30)?,
            expiry_sweep_interval_secs: optional("EXPIRY_SWEEP_INTERVAL_SECS", 300)?,
            explorer_base_url: dotenv::var("EXPLORER_BASE_URL")
                .unwrap_or("https://sepolia.etherscan.io".to_string()),
        })
    }
}

fn require(name: &str) -> Result<String, String> {
    dotenv::var(name).map_err(|_| format!("missing required environment variable: {name}"))
}

fn optional<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match dotenv::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| format!("invalid value for {name}: {err}")),
        Err(_) => Ok(default),
    }
}
