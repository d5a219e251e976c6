/// Data-source collaborator contract and its credentials
use crate::config::types::StorageError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ACCOUNT_ENV_KEY: &str = "AZURE_STORAGE_ACCOUNT";
pub const ACCESS_KEY_ENV_KEY: &str = "AZURE_STORAGE_ACCESS_KEY";

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Blob store holding algorithm and data bytes
pub trait DataSource {
    /// Fails with `NotFound` or `AccessDenied`
    fn fetch(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Fails with `AccessDenied` or `QuotaExceeded`
    fn store(&self, path: &str, bytes: &[u8]) -> StorageResult<()>;
}

#[derive(Deserialize)]
struct RawStorageConfig {
    #[serde(default)]
    account: String,
    #[serde(default)]
    access_key: String,
    #[serde(default)]
    container: String,
}

/// Credentials and container for a data source.
///
/// Validated on construction, including deserialization, so an invalid
/// configuration never reaches the network or disk.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawStorageConfig")]
pub struct StorageConfig {
    account: String,
    access_key: String,
    container: String,
}

fn invalid_name(kind: &str, name: &str, rule: &str) -> StorageError {
    StorageError::Validation(format!(
        "The specified {kind} name {name:?} contains invalid characters: {rule}"
    ))
}

/// Accounts: 3-24 lowercase letters or digits
fn validate_account_name(name: &str) -> StorageResult<()> {
    let valid = (3..=24).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(invalid_name("account", name, "3-24 lowercase letters or digits"))
    }
}

/// Containers: 3-63 lowercase letters, digits or single hyphens, starting
/// and ending with a letter or digit
fn validate_container_name(name: &str) -> StorageResult<()> {
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let bytes = name.as_bytes();
    let valid = (3..=63).contains(&bytes.len())
        && bytes.iter().all(|&b| alnum(b) || b == b'-')
        && bytes.first().copied().is_some_and(alnum)
        && bytes.last().copied().is_some_and(alnum)
        && !name.contains("--");
    if valid {
        Ok(())
    } else {
        Err(invalid_name(
            "container",
            name,
            "3-63 lowercase letters, digits or single hyphens",
        ))
    }
}

impl TryFrom<RawStorageConfig> for StorageConfig {
    type Error = StorageError;

    fn try_from(raw: RawStorageConfig) -> StorageResult<Self> {
        Self::new(raw.account, raw.access_key, raw.container)
    }
}

impl StorageConfig {
    pub fn new(
        account: impl Into<String>,
        access_key: impl Into<String>,
        container: impl Into<String>,
    ) -> StorageResult<Self> {
        let account = account.into();
        let access_key = access_key.into();
        let container = container.into();

        if container.is_empty() {
            return Err(StorageError::Validation(
                "container name must be non-empty".to_string(),
            ));
        }
        if account.is_empty() || access_key.is_empty() {
            return Err(StorageError::Config(format!(
                "Either the {} or {} value is not set",
                ACCOUNT_ENV_KEY, ACCESS_KEY_ENV_KEY
            )));
        }
        STANDARD
            .decode(access_key.as_bytes())
            .map_err(|e| StorageError::Config(format!("Invalid credentials: {e}")))?;
        validate_account_name(&account)?;
        validate_container_name(&container)?;

        Ok(Self {
            account,
            access_key,
            container,
        })
    }

    /// Read account and access key from the environment, once, at construction
    pub fn from_env(container: impl Into<String>) -> StorageResult<Self> {
        let account = std::env::var(ACCOUNT_ENV_KEY).unwrap_or_default();
        let access_key = std::env::var(ACCESS_KEY_ENV_KEY).unwrap_or_default();
        Self::new(account, access_key, container)
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Decoded shared key
    pub fn key_bytes(&self) -> Vec<u8> {
        // Decoding was checked in new()
        STANDARD.decode(self.access_key.as_bytes()).unwrap_or_default()
    }

    /// Blob-service URL of the container
    pub fn container_url(&self) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}",
            self.account, self.container
        )
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("account", &self.account)
            .field("access_key", &"<redacted>")
            .field("container", &self.container)
            .finish()
    }
}
