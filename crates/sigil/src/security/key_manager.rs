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

//! Bootstrapping of the legacy signing identity.
//!
//! The legacy identity lives in the host keystore, which is shared by every
//! process on the host. [`LegacyKeyManager::ensure_legacy_identity`] checks for
//! it and, when absent, fetches the armored private key from the secret vault
//! and imports it. Imports within a process are serialised; across processes
//! the keystore's own idempotent import applies.

use super::audit;
use super::scrub::secure_delete;
use crate::config::KeyCodes;
use crate::error::SignError;
use crate::signing::Keystore;
use crate::vault::SecretVault;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// What [`LegacyKeyManager::ensure_legacy_identity`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPresence {
    /// The keystore already held the identity; nothing was fetched.
    AlreadyPresent,
    /// The identity was fetched from the vault and imported.
    Imported,
}

/// Where the legacy private key is stored and how it is identified.
#[derive(Debug, Clone)]
pub struct LegacyKeySource {
    pub vault: String,
    pub secret: String,
    pub thumbprint: String,
}

pub struct LegacyKeyManager {
    keystore: Arc<dyn Keystore>,
    vault: Arc<dyn SecretVault>,
    source: LegacyKeySource,
    key_codes: KeyCodes,
    scratch_dir: PathBuf,
    import_lock: Mutex<()>,
}

impl std::fmt::Debug for LegacyKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyKeyManager")
            .field("source", &self.source)
            .field("key_codes", &self.key_codes)
            .field("scratch_dir", &self.scratch_dir)
            .finish_non_exhaustive()
    }
}

impl LegacyKeyManager {
    pub fn new(
        keystore: Arc<dyn Keystore>,
        vault: Arc<dyn SecretVault>,
        source: LegacyKeySource,
        key_codes: KeyCodes,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            keystore,
            vault,
            source,
            key_codes,
            scratch_dir: scratch_dir.into(),
            import_lock: Mutex::new(()),
        }
    }

    pub fn thumbprint(&self) -> &str {
        &self.source.thumbprint
    }

    /// True iff `key_id` is one of the configured remote key codes.
    pub fn is_permitted(&self, key_id: &str) -> bool {
        self.key_codes.is_permitted(key_id)
    }

    /// Make sure the legacy identity is in the keystore.
    ///
    /// Returns immediately when the thumbprint is already listed. Otherwise the
    /// key is fetched, written to a single-use file under the scratch
    /// directory, imported, and the file is scrubbed on every exit path.
    pub async fn ensure_legacy_identity(&self) -> Result<KeyPresence, SignError> {
        if self.is_present().await {
            audit::log_legacy_key_present(&self.source.thumbprint);
            return Ok(KeyPresence::AlreadyPresent);
        }

        let _guard = self.import_lock.lock().await;
        // Another task may have imported while we waited.
        if self.is_present().await {
            audit::log_legacy_key_present(&self.source.thumbprint);
            return Ok(KeyPresence::AlreadyPresent);
        }

        match self.import().await {
            Ok(()) => {
                audit::log_legacy_key_imported(
                    &self.source.thumbprint,
                    &self.source.vault,
                    &self.source.secret,
                );
                crate::metrics::record_legacy_key_import();
                Ok(KeyPresence::Imported)
            }
            Err(e) => {
                audit::log_legacy_key_import_failed(&self.source.thumbprint, &e.to_string());
                Err(e)
            }
        }
    }

    /// Listing failures are logged and treated as "absent" so the import can
    /// still go ahead.
    async fn is_present(&self) -> bool {
        match self.keystore.has_secret_key(&self.source.thumbprint).await {
            Ok(present) => present,
            Err(e) => {
                error!(
                    key_thumbprint = %self.source.thumbprint,
                    error = %e,
                    "Failed to list keystore, proceeding as if the key were absent"
                );
                false
            }
        }
    }

    async fn import(&self) -> Result<(), SignError> {
        info!(
            vault = %self.source.vault,
            secret = %self.source.secret,
            "Downloading legacy signing key"
        );
        let material = self
            .vault
            .get_secret(&self.source.vault, &self.source.secret)
            .await?;

        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let temp = tempfile::Builder::new()
            .prefix("legacy-key-")
            .suffix(".pem")
            .tempfile_in(&self.scratch_dir)?;
        let key_path = temp.path().to_path_buf();

        let result = async {
            tokio::fs::write(&key_path, material.as_bytes()).await?;
            info!("Importing legacy key from disk");
            self.keystore.import_key(&key_path).await
        }
        .await;

        if let Err(e) = secure_delete(&key_path).await {
            warn!(path = %key_path.display(), error = %e, "Failed to scrub key material");
        }
        // Removes the file if scrubbing failed part way.
        drop(temp);

        result
    }
}
