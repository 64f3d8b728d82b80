//! School-email verification: mail a one-time code, check it, grant a role.

pub mod mailer;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use crate::session::SessionCache;
use mailer::Mailer;
use store::EmailDirectory;

/// How long a mailed code stays valid without being checked.
pub const PENDING_TTL: Duration = Duration::from_secs(15 * 60);

const LOCAL_PREFIX: char = 's';
const LOCAL_DIGITS: usize = 5;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("not an accepted school address: {0}")]
    InvalidEmail(String),
    #[error("no pending code")]
    NoPendingCode,
    #[error("code does not match")]
    CodeMismatch,
    #[error("mail error: {0}")]
    Mail(String),
    #[error("store error: {0}")]
    Store(String),
}

/// Accepted addresses look like `s12345@<domain>`.
#[derive(Debug, Clone)]
pub struct EmailPolicy {
    domain: String,
}

impl EmailPolicy {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into().trim().to_ascii_lowercase(),
        }
    }

    /// The normalised address, or `None` when it does not match.
    pub fn accept(&self, raw: &str) -> Option<String> {
        let email = raw.trim().to_ascii_lowercase();
        let (local, domain) = email.split_once('@')?;
        let digits = local.strip_prefix(LOCAL_PREFIX)?;
        let well_formed = digits.len() == LOCAL_DIGITS
            && digits.bytes().all(|b| b.is_ascii_digit())
            && domain == self.domain;
        well_formed.then_some(email)
    }

    pub fn example(&self) -> String {
        format!("{}{}@{}", LOCAL_PREFIX, "0".repeat(LOCAL_DIGITS), self.domain)
    }
}

/// Six digits, never starting with zero.
pub fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

#[derive(Debug, Clone)]
pub struct PendingCode {
    pub email: String,
    pub code: String,
}

/// Drives one user's verification from address to stored record.
pub struct Verifier {
    policy: EmailPolicy,
    mailer: Arc<dyn Mailer>,
    emails: Arc<dyn EmailDirectory>,
    pending: Arc<SessionCache<PendingCode>>,
    role_id: u64,
}

impl Verifier {
    pub fn new(
        policy: EmailPolicy,
        mailer: Arc<dyn Mailer>,
        emails: Arc<dyn EmailDirectory>,
        role_id: u64,
    ) -> Self {
        Self {
            policy,
            mailer,
            emails,
            pending: Arc::new(SessionCache::new(PENDING_TTL)),
            role_id,
        }
    }

    pub fn role_id(&self) -> u64 {
        self.role_id
    }

    pub fn policy(&self) -> &EmailPolicy {
        &self.policy
    }

    pub fn pending(&self) -> Arc<SessionCache<PendingCode>> {
        self.pending.clone()
    }

    /// Validate the address, then mail a fresh code. A new request replaces
    /// any code still pending for the user.
    pub async fn request_code(&self, user_id: u64, raw_email: &str) -> Result<String, VerifyError> {
        let email = self
            .policy
            .accept(raw_email)
            .ok_or_else(|| VerifyError::InvalidEmail(raw_email.trim().to_string()))?;
        let code = generate_code();
        self.pending
            .create(
                user_id,
                user_id,
                PendingCode {
                    email: email.clone(),
                    code: code.clone(),
                },
            )
            .await;

        if let Err(e) = self.mailer.send_code(&email, &code).await {
            self.pending.remove(user_id).await;
            warn!(user_id, "Verification mail failed: {}", e);
            return Err(e);
        }
        info!(user_id, "Verification code issued");
        Ok(email)
    }

    /// The address the code was sent to, when the code matches.
    /// The pending entry stays until `complete`, so a failed role grant can be retried.
    pub async fn check_code(&self, user_id: u64, code: &str) -> Result<String, VerifyError> {
        let pending = self
            .pending
            .get(user_id, user_id)
            .await
            .ok_or(VerifyError::NoPendingCode)?;
        if pending.code != code.trim() {
            return Err(VerifyError::CodeMismatch);
        }
        Ok(pending.email)
    }

    /// Record the verified address and forget the code.
    pub async fn complete(&self, user_id: u64, email: &str) -> Result<(), VerifyError> {
        self.emails.save(user_id, email).await?;
        self.pending.remove(user_id).await;
        info!(user_id, "Verification complete");
        Ok(())
    }
}
