use std::sync::Arc;

use alloy_primitives::Address;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_email::Email;
use serde_json::json;

use crate::asset::Asset;
use crate::chain::{self, ChainClient};
use crate::db::user::UserStore;
use crate::error::WalletError;
use crate::wallet::WalletService;

type WalletState = (
    Arc<WalletService>,
    Arc<dyn UserStore>,
    Arc<dyn ChainClient>,
    Address,
);

#[derive(Debug, Deserialize)]
struct EmailRequest {
    email: Email,
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    email: Email,
    code: String,
}

fn map_wallet_error(err: WalletError) -> (StatusCode, &'static str) {
    match err {
        WalletError::AlreadyExists => (
            StatusCode::CONFLICT,
            "Wallet already exists, use login instead",
        ),
        WalletError::NotFound => (StatusCode::NOT_FOUND, "User not found"),
        WalletError::InvalidOtp => (StatusCode::UNAUTHORIZED, "Invalid verification code"),
        WalletError::WalletMissing => (StatusCode::NOT_FOUND, "No wallet for this email"),
        WalletError::Custody(err) => {
            tracing::error!("custody failure: {err}");
            (StatusCode::BAD_GATEWAY, "Wallet provider unavailable")
        }
        WalletError::Store(err) => {
            tracing::error!("store failure: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

async fn create_wallet(
    State((service, _, _, _)): State<WalletState>,
    Json(request): Json<EmailRequest>,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    tracing::info!("Starting wallet creation for {}", request.email);
    match service.create_wallet(request.email.as_str()).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({ "message": "Verification code sent" })),
        )),
        Err(err) => Err(map_wallet_error(err)),
    }
}

async fn verify_wallet(
    State((service, _, _, _)): State<WalletState>,
    Json(request): Json<VerifyRequest>,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    match service
        .verify_wallet(request.email.as_str(), &request.code)
        .await
    {
        Ok(user) => Ok((StatusCode::OK, Json(user))),
        Err(err) => Err(map_wallet_error(err)),
    }
}

async fn login(
    State((service, _, _, _)): State<WalletState>,
    Json(request): Json<EmailRequest>,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    match service.login(request.email.as_str()).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({ "message": "Login code sent" })),
        )),
        Err(err) => Err(map_wallet_error(err)),
    }
}

async fn verify_login(
    State((service, _, _, _)): State<WalletState>,
    Json(request): Json<VerifyRequest>,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    match service
        .verify_login(request.email.as_str(), &request.code)
        .await
    {
        Ok(user) => Ok((StatusCode::OK, Json(user))),
        Err(err) => Err(map_wallet_error(err)),
    }
}

async fn resend_otp(
    State((service, _, _, _)): State<WalletState>,
    Json(request): Json<EmailRequest>,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    match service.resend_otp(request.email.as_str()).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({ "message": "Verification code sent" })),
        )),
        Err(err) => Err(map_wallet_error(err)),
    }
}

// both balances for the wallet bound to this email
async fn get_balance(
    State((_, users, chain_client, token)): State<WalletState>,
    Path(email): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    let user = match users.find_by_email(&email.to_lowercase()).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err((StatusCode::NOT_FOUND, "User not found")),
        Err(err) => {
            tracing::error!("Failed to load user {email}: {err}");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal error"));
        }
    };

    let Some(raw_address) = user.wallet_address else {
        return Err((StatusCode::NOT_FOUND, "No wallet for this email"));
    };
    let address = match chain::parse_address(&raw_address) {
        Ok(address) => address,
        Err(err) => {
            tracing::error!("Stored wallet address for {email} is invalid: {err}");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal error"));
        }
    };

    let native = chain_client.native_balance(address).await;
    let tokens = chain_client.token_balance(token, address).await;
    let (native, tokens) = match (native, tokens) {
        (Ok(native), Ok(tokens)) => (native, tokens),
        (native, tokens) => {
            tracing::error!("Balance lookup failed for {email}: {native:?} {tokens:?}");
            return Err((StatusCode::BAD_GATEWAY, "Chain unavailable"));
        }
    };

    Ok((
        StatusCode::OK,
        Json(json!({
            "address": raw_address,
            "eth": chain::format_units(native, Asset::Eth.decimals()),
            "pyusd": chain::format_units(tokens, Asset::Pyusd.decimals()),
        })),
    ))
}

pub fn wallet_route(
    service: Arc<WalletService>,
    users: Arc<dyn UserStore>,
    chain_client: Arc<dyn ChainClient>,
    token: Address,
) -> Router {
    Router::new()
        .route("/wallets/create", post(create_wallet))
        .route("/wallets/verify", post(verify_wallet))
        .route("/wallets/login", post(login))
        .route("/wallets/login/verify", post(verify_login))
        .route("/wallets/resend-otp", post(resend_otp))
        .route("/wallets/:email/balance", get(get_balance))
        .with_state((service, users, chain_client, token))
}
