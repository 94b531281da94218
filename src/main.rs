use std::process;
use std::sync::Arc;
use std::time::Duration;

use alloy::signers::local::PrivateKeySigner;
use axum::Router;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::net::TcpListener;
use tower_http::{
    compression::CompressionLayer, limit::RequestBodyLimitLayer,
    validate_request::ValidateRequestHeaderLayer,
};
use tracing_subscriber::{
    fmt::{writer::BoxMakeWriter, Layer},
    layer::SubscriberExt,
    EnvFilter, Registry,
};

use chain::{ChainClient, RpcChainClient};
use config::Config;
use db::tx::{PgTransactionRepository, TransactionStore};
use db::user::{PgUserRepository, UserStore};
use email::{gmail::GmailClient, gmail::GmailConfig, EmailGateway};
use engine::{EngineConfig, ExecutionEngine};
use jobs::JobContext;
use scheduler::JobScheduler;
use signer::custody::RelayCustodyClient;
use signer::SignerSelector;
use wallet::WalletService;

mod asset;
mod chain;
mod config;
mod db;
mod email;
mod engine;
mod error;
mod intent;
mod jobs;
mod routes;
mod scheduler;
mod signer;
#[cfg(test)]
mod testkit;
mod wallet;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            process::exit(1);
        }
    };

    // add tracing layer
    let file_appender = tracing_appender::rolling::never(".", &config.log_file);
    let (file_writer, _file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, _stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = Layer::new()
        .json()
        .with_writer(BoxMakeWriter::new(move || file_writer.clone()));
    let stdout_layer = Layer::new().with_writer(BoxMakeWriter::new(move || stdout_writer.clone()));

    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(file_layer)
        .with(stdout_layer);

    tracing::subscriber::set_global_default(subscriber).expect("Unable to set global subscriber");

    let database_pool =
        match process_database(&config.database_url, config.max_connection_pooling).await {
            Ok(db) => {
                tracing::info!("Connected to database");
                db
            }
            Err(err) => {
                tracing::error!("Failed to connect to database: {err}");
                process::exit(1);
            }
        };

    // a bad operator key is fatal at startup, never at signing time
    let operator_key = match config.hot_wallet_private_key.parse::<PrivateKeySigner>() {
        Ok(key) => key,
        Err(err) => {
            tracing::error!("Invalid operator key: {err}");
            process::exit(1);
        }
    };

    let chain_client: Arc<dyn ChainClient> = match RpcChainClient::connect(&config.rpc_url) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            tracing::error!("Failed to construct chain client: {err}");
            process::exit(1);
        }
    };

    let txs: Arc<dyn TransactionStore> = Arc::new(PgTransactionRepository::new(
        database_pool.clone(),
    ));
    let users: Arc<dyn UserStore> = Arc::new(PgUserRepository::new(database_pool.clone()));

    let custody = Arc::new(RelayCustodyClient::new(
        config.custody_relay_url.clone(),
        config.custody_relay_api_key.clone(),
    ));
    let selector = Arc::new(SignerSelector::new(
        operator_key,
        custody.clone(),
        config.rpc_url.clone(),
        config.chain_id,
        config.session_ttl_hours,
    ));
    let mailer: Arc<dyn EmailGateway> = Arc::new(GmailClient::new(GmailConfig {
        client_id: config.gmail_client_id.clone(),
        client_secret: config.gmail_client_secret.clone(),
        refresh_token: config.gmail_refresh_token.clone(),
        poll_query: config.gmail_poll_query.clone(),
    }));

    let engine = Arc::new(ExecutionEngine::new(
        txs.clone(),
        users.clone(),
        chain_client.clone(),
        selector,
        mailer.clone(),
        EngineConfig {
            chain_id: config.chain_id,
            token_address: config.pyusd_address,
            max_tx_amount: config.max_tx_amount,
            daily_tx_cap: config.daily_tx_cap,
            tx_expiry_minutes: config.tx_expiry_minutes,
            confirmations: config.tx_confirmations,
            explorer_base_url: config.explorer_base_url.clone(),
        },
    ));
    let wallets = Arc::new(WalletService::new(
        users.clone(),
        custody,
        mailer.clone(),
    ));

    let mut scheduler = JobScheduler::new();
    let ctx = Arc::new(JobContext {
        engine,
        wallets: wallets.clone(),
        txs: txs.clone(),
        users: users.clone(),
        chain: chain_client.clone(),
        mailer,
        queue: scheduler.queue(),
        token_address: config.pyusd_address,
    });
    jobs::register_all(&mut scheduler, ctx);
    scheduler.run_every(Duration::from_secs(config.poll_interval_secs), jobs::POLL_INBOX);
    scheduler.run_every(
        Duration::from_secs(config.expiry_sweep_interval_secs),
        jobs::EXPIRE_STALE,
    );
    let _scheduler_handle = scheduler.start();
    tracing::info!("Job scheduler started");

    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(port) => {
            tracing::info!("Listening on port: {}", port.local_addr().unwrap().port());
            port
        }
        Err(err) => {
            tracing::error!("Failed to bind to port: {err}");
            process::exit(1);
        }
    };

    let router = process_begin(txs, users, wallets, chain_client, &config);
    tracing::info!("Routes constructed successfully");

    // start the http service
    let http_service = axum::serve(listener, router);
    if let Err(err) = http_service.await {
        tracing::error!("Failed to start server: {err}");
        process::exit(1);
    }
}

fn process_begin(
    txs: Arc<dyn TransactionStore>,
    users: Arc<dyn UserStore>,
    wallets: Arc<WalletService>,
    chain_client: Arc<dyn ChainClient>,
    config: &Config,
) -> Router {
    let head_route = Router::new();

    let tx_routes = routes::tx::tx_route(txs)
        .route_layer(CompressionLayer::new().gzip(true));
    let wallet_routes =
        routes::wallet::wallet_route(wallets, users, chain_client, config.pyusd_address)
            .route_layer(ValidateRequestHeaderLayer::accept("application/json"));

    head_route
        .nest("/v1/emailpay", tx_routes)
        .nest("/v1/emailpay", wallet_routes)
        .route_layer(RequestBodyLimitLayer::new(1024 * 10)) // 10KB limit
}

async fn process_database(url: &str, max_conn_pool: u32) -> Result<PgPool, String> {
    // create a connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(max_conn_pool)
        .connect(url)
        .await
        .map_err(|err| format!("Failed to connect to database: {err}"))?;

    match sqlx::migrate!("./migrations").run(&db_pool).await {
        Ok(_) => {
            tracing::info!("Migrations run successfully");
        }
        Err(err) => {
            // if it fails we assume to continue believing that the database is already migrated
            tracing::warn!("Failed to run migrations: {err}");
        }
    }

    Ok(db_pool)
}
