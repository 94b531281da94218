use std::sync::Arc;

use rand::Rng;

use crate::db::user::{User, UserStore};
use crate::email::EmailGateway;
use crate::error::WalletError;
use crate::signer::custody::CustodyClient;

/// Wallet onboarding and login. Every flow is two-step: an OTP is mailed to
/// prove control of the address, and the sensitive action happens only after
/// the code is consumed.
pub struct WalletService {
    users: Arc<dyn UserStore>,
    custody: Arc<dyn CustodyClient>,
    mailer: Arc<dyn EmailGateway>,
}

impl WalletService {
    pub fn new(
        users: Arc<dyn UserStore>,
        custody: Arc<dyn CustodyClient>,
        mailer: Arc<dyn EmailGateway>,
    ) -> Self {
        Self {
            users,
            custody,
            mailer,
        }
    }

    /// Start wallet creation: register the email (or refresh a pending
    /// registration) and mail a fresh OTP. Rejected once a wallet exists.
    pub async fn create_wallet(&self, email: &str) -> Result<(), WalletError> {
        let email = email.to_lowercase();
        if let Some(user) = self.users.find_by_email(&email).await? {
            if user.verified && user.wallet_address.is_some() {
                return Err(WalletError::AlreadyExists);
            }
        }

        let otp = generate_otp();
        self.users.upsert_pending(&email, &otp).await?;
        self.mail_otp(&email, &otp, "EmailPay wallet verification")
            .await;
        tracing::info!("wallet creation started for {email}");
        Ok(())
    }

    /// Complete wallet creation: consume the OTP, mint a custody wallet and
    /// bind it to the user.
    pub async fn verify_wallet(&self, email: &str, otp: &str) -> Result<User, WalletError> {
        let email = email.to_lowercase();
        if self.users.find_by_email(&email).await?.is_none() {
            return Err(WalletError::NotFound);
        }
        if !self.users.consume_otp(&email, otp).await? {
            return Err(WalletError::InvalidOtp);
        }

        let minted = self
            .custody
            .mint_wallet(&email)
            .await
            .map_err(|err| WalletError::Custody(err.to_string()))?;
        self.users
            .attach_wallet(&email, &minted.public_key, &minted.address, &minted.token_id)
            .await?;

        tracing::info!("wallet {} provisioned for {email}", minted.address);
        self.users
            .find_by_email(&email)
            .await?
            .ok_or(WalletError::NotFound)
    }

    /// Start a login for an existing wallet: mail a fresh OTP.
    pub async fn login(&self, email: &str) -> Result<(), WalletError> {
        let email = email.to_lowercase();
        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(WalletError::NotFound)?;
        if user.wallet_address.is_none() {
            return Err(WalletError::WalletMissing);
        }

        let otp = generate_otp();
        self.users.set_otp(&email, &otp).await?;
        self.mail_otp(&email, &otp, "EmailPay login verification")
            .await;
        Ok(())
    }

    /// Complete a login: consume the OTP and return the wallet record.
    pub async fn verify_login(&self, email: &str, otp: &str) -> Result<User, WalletError> {
        let email = email.to_lowercase();
        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(WalletError::NotFound)?;
        if user.wallet_address.is_none() {
            return Err(WalletError::WalletMissing);
        }
        if !self.users.consume_otp(&email, otp).await? {
            return Err(WalletError::InvalidOtp);
        }
        Ok(user)
    }

    /// Mail a fresh OTP for whichever flow is in progress.
    pub async fn resend_otp(&self, email: &str) -> Result<(), WalletError> {
        let email = email.to_lowercase();
        let otp = generate_otp();
        if !self.users.set_otp(&email, &otp).await? {
            return Err(WalletError::NotFound);
        }
        self.mail_otp(&email, &otp, "EmailPay verification code")
            .await;
        Ok(())
    }

    async fn mail_otp(&self, email: &str, otp: &str, subject: &str) {
        let body = format!(
            "Your EmailPay verification code is: {otp}\n\n\
             The code is valid for one use. If you did not request it, ignore this email."
        );
        if let Err(err) = self.mailer.send_reply(email, subject, &body, None).await {
            tracing::error!("failed to mail OTP to {email}: {err}");
        }
    }
}

/// Six decimal digits, never leading-zero-truncated.
fn generate_otp() -> String {
    let code: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
    code.to_string()
}
