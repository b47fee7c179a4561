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

//! Secret vault clients.
//!
//! The legacy signing identity's private key lives in a secret vault and is
//! fetched only when the local keystore lacks it. [`KeyVaultClient`] talks to
//! the cloud vault over HTTPS; [`FileVault`] reads secrets from a directory
//! and serves development setups and tests.

mod file;
mod keyvault;

pub use file::FileVault;
pub use keyvault::{KeyVaultClient, IMDS_TOKEN_ENDPOINT};

use crate::error::ErrorKind;
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while fetching a secret.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Vault request failed: {0}")]
    Connection(String),

    #[error("Vault rejected our credentials: {0}")]
    Unauthorized(String),

    #[error("Secret '{secret}' not found in vault '{vault}'")]
    NotFound { vault: String, secret: String },

    #[error("Invalid vault or secret name: '{0}'")]
    InvalidName(String),

    #[error("Unexpected vault response: {0}")]
    InvalidResponse(String),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Connection(_) => ErrorKind::Transient,
            VaultError::Unauthorized(_) => ErrorKind::Authentication,
            VaultError::NotFound { .. } => ErrorKind::NotFound,
            VaultError::InvalidName(_) | VaultError::InvalidResponse(_) => ErrorKind::Validation,
        }
    }
}

/// Read access to named secrets.
///
/// Implementations make a single attempt per call; callers own retries.
#[async_trait]
pub trait SecretVault: Send + Sync {
    async fn get_secret(&self, vault: &str, secret: &str) -> Result<String, VaultError>;
}

/// Vault and secret names are DNS-ish labels: alphanumerics and dashes.
pub(crate) fn validate_name(name: &str) -> Result<&str, VaultError> {
    let valid = !name.is_empty()
        && name.len() <= 127
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(VaultError::InvalidName(name.to_string()))
    }
}
