use async_trait::async_trait;
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::VerifyError;

// No trailing slash (cnidarium substore convention)
pub const EMAIL_PREFIX: &str = "verify/email";

fn email_key(user_id: u64) -> String {
    format!("{}/{}", EMAIL_PREFIX, user_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub user_id: u64,
    pub email: String,
    /// Unix seconds of the last successful verification.
    pub verified_at: i64,
}

/// Verified school addresses, one per Discord user.
#[async_trait]
pub trait EmailDirectory: Send + Sync {
    /// Upsert; a later verification replaces the earlier address.
    async fn save(&self, user_id: u64, email: &str) -> Result<(), VerifyError>;

    async fn get(&self, user_id: u64) -> Result<Option<EmailRecord>, VerifyError>;
}

fn store_err(e: impl std::fmt::Display) -> VerifyError {
    VerifyError::Store(e.to_string())
}

pub struct EmailStore {
    storage: Storage,
}

impl EmailStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl EmailDirectory for EmailStore {
    async fn save(&self, user_id: u64, email: &str) -> Result<(), VerifyError> {
        let record = EmailRecord {
            user_id,
            email: email.to_string(),
            verified_at: chrono::Utc::now().timestamp(),
        };
        let bytes = serde_json::to_vec(&record).map_err(store_err)?;

        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.put_raw(email_key(user_id), bytes);
        self.storage.commit(delta).await.map_err(store_err)?;
        debug!(user_id, "verified email stored");
        Ok(())
    }

    async fn get(&self, user_id: u64) -> Result<Option<EmailRecord>, VerifyError> {
        let snapshot = self.storage.latest_snapshot();
        let Some(bytes) = snapshot.get_raw(&email_key(user_id)).await.map_err(store_err)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes).map(Some).map_err(store_err)
    }
}
