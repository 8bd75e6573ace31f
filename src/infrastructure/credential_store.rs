use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

const KEYRING_SERVICE: &str = "msgblock.oauth.google";
const KEYRING_ACCOUNT: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl StoredToken {
    /// Usable for at least `leeway_seconds` more.
    pub fn is_usable_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        !self.access_token.trim().is_empty()
            && self.expires_at > now + Duration::seconds(leeway_seconds)
    }
}

pub trait TokenStore: Send + Sync {
    fn save(&self, token: &StoredToken) -> Result<(), InfraError>;
    fn load(&self) -> Result<Option<StoredToken>, InfraError>;
    fn clear(&self) -> Result<(), InfraError>;
}

/// Token kept as JSON in the OS keyring.
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service: String,
    account: String,
}

impl KeyringTokenStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service, &self.account).map_err(credential_error)
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_ACCOUNT)
    }
}

fn credential_error(error: impl std::fmt::Display) -> InfraError {
    InfraError::Credential(error.to_string())
}

impl TokenStore for KeyringTokenStore {
    fn save(&self, token: &StoredToken) -> Result<(), InfraError> {
        let payload = serde_json::to_string(token).map_err(credential_error)?;
        self.entry()?.set_password(&payload).map_err(credential_error)
    }

    fn load(&self) -> Result<Option<StoredToken>, InfraError> {
        match self.entry()?.get_password() {
            Ok(payload) => serde_json::from_str(&payload)
                .map(Some)
                .map_err(credential_error),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(credential_error(error)),
        }
    }

    fn clear(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(credential_error(error)),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    token: Mutex<Option<StoredToken>>,
}

impl InMemoryTokenStore {
    fn with_slot<T>(&self, f: impl FnOnce(&mut Option<StoredToken>) -> T) -> Result<T, InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(f(&mut guard))
    }
}

impl TokenStore for InMemoryTokenStore {
    fn save(&self, token: &StoredToken) -> Result<(), InfraError> {
        self.with_slot(|slot| *slot = Some(token.clone()))
    }

    fn load(&self) -> Result<Option<StoredToken>, InfraError> {
        self.with_slot(|slot| slot.clone())
    }

    fn clear(&self) -> Result<(), InfraError> {
        self.with_slot(|slot| *slot = None)
    }
}
