/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Signer configuration.
//!
//! Settings come from, lowest precedence first: built-in defaults, an
//! optional TOML file (with `${VAR}` substitution), a `.env` file and the
//! process environment. See [`ConfigLoader`].

mod error;
mod loader;
mod validation;

pub use error::{ConfigError, ValidationError};
pub use loader::ConfigLoader;
pub use validation::Validate;

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Reserved key id selecting the locally held legacy identity.
pub const LEGACY_KEY_CODE: &str = "legacy";

/// Shortest accepted legacy key thumbprint: a long (64-bit) key id.
pub const MIN_THUMBPRINT_LEN: usize = 16;

/// Longest accepted legacy key thumbprint: a v4 fingerprint.
pub const MAX_THUMBPRINT_LEN: usize = 40;

/// Immutable set of remote key codes this signer may use.
///
/// Parsed once from a semicolon-delimited list; surrounding whitespace and
/// empty entries are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "KeyCodesRepr", into = "Vec<String>")]
pub struct KeyCodes {
    codes: HashSet<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyCodesRepr {
    Joined(String),
    List(Vec<String>),
}

impl From<KeyCodesRepr> for KeyCodes {
    fn from(repr: KeyCodesRepr) -> Self {
        match repr {
            KeyCodesRepr::Joined(joined) => KeyCodes::parse(&joined),
            KeyCodesRepr::List(list) => list.into_iter().collect(),
        }
    }
}

impl From<KeyCodes> for Vec<String> {
    fn from(codes: KeyCodes) -> Self {
        let mut list: Vec<String> = codes.codes.into_iter().collect();
        list.sort();
        list
    }
}

impl<S: Into<String>> FromIterator<S> for KeyCodes {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let codes = iter
            .into_iter()
            .map(Into::into)
            .map(|code: String| code.trim().to_string())
            .filter(|code| !code.is_empty())
            .collect();
        Self { codes }
    }
}

impl KeyCodes {
    pub fn parse(joined: &str) -> Self {
        joined.split(';').collect()
    }

    /// True iff `key_id` is one of the configured codes.
    pub fn is_permitted(&self, key_id: &str) -> bool {
        self.codes.contains(key_id)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }
}

/// Where legacy key material is fetched from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultBackend {
    /// Cloud key vault reached over HTTPS with a managed identity.
    #[default]
    KeyVault,
    /// Directory of secret files, for development and tests.
    File,
}

impl FromStr for VaultBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keyvault" => Ok(VaultBackend::KeyVault),
            "file" => Ok(VaultBackend::File),
            other => Err(ConfigError::InvalidValue {
                key: "vault_backend".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for VaultBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultBackend::KeyVault => f.write_str("keyvault"),
            VaultBackend::File => f.write_str("file"),
        }
    }
}

/// Retry tuning applied identically to every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: crate::retry::DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: false,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .jitter(self.jitter)
            .build()
    }
}

/// Everything the signer needs at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Name of the vault holding the legacy private key.
    pub keyvault: String,
    /// Certificate used to authenticate with the remote signing authority.
    pub auth_cert_path: String,
    /// Certificate identifier the remote authority signs with.
    pub sign_cert: String,
    /// Vault secret name holding the armored legacy private key.
    pub legacy_key_path: String,
    pub app_id: String,
    pub tenant_id: String,
    pub key_codes: KeyCodes,
    /// Thumbprint identifying the legacy identity in the local keystore.
    pub legacy_key_thumbprint: String,

    /// Shared result store. `None` keeps results in process memory.
    pub database_url: Option<String>,
    pub db_pool_size: usize,
    /// Scratch space for key material and signing inputs.
    pub scratch_dir: PathBuf,
    /// Where produced signatures are written.
    pub signature_dir: PathBuf,
    pub gpg_path: PathBuf,
    /// Keystore home. `None` uses `~/.gnupg`.
    pub gpg_home: Option<PathBuf>,
    pub esrp_client_path: PathBuf,
    pub vault_backend: VaultBackend,
    /// Root directory for the file vault backend.
    pub vault_dir: Option<PathBuf>,
    /// Client id of a user-assigned managed identity.
    pub identity_client_id: Option<String>,
    pub retry: RetrySettings,
}

impl Default for SignerConfig {
    fn default() -> Self {
        let data_dir = std::env::temp_dir().join("sigil");
        Self {
            keyvault: String::new(),
            auth_cert_path: String::new(),
            sign_cert: String::new(),
            legacy_key_path: String::new(),
            app_id: String::new(),
            tenant_id: String::new(),
            key_codes: KeyCodes::default(),
            legacy_key_thumbprint: String::new(),
            database_url: None,
            db_pool_size: 10,
            scratch_dir: data_dir.join("scratch"),
            signature_dir: data_dir.join("signatures"),
            gpg_path: PathBuf::from("gpg"),
            gpg_home: None,
            esrp_client_path: PathBuf::from("EsrpClient"),
            vault_backend: VaultBackend::KeyVault,
            vault_dir: None,
            identity_client_id: None,
            retry: RetrySettings::default(),
        }
    }
}

impl SignerConfig {
    /// Whether `key_id` may be used with the remote authority.
    pub fn is_permitted(&self, key_id: &str) -> bool {
        self.key_codes.is_permitted(key_id)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.to_policy()
    }

    /// Keystore home, falling back to `$HOME/.gnupg`.
    pub fn resolved_gpg_home(&self) -> PathBuf {
        match &self.gpg_home {
            Some(home) => home.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".gnupg"),
        }
    }
}
