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

//! Directory-backed secret vault.

use super::{validate_name, SecretVault, VaultError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Serves secrets from `<root>/<vault>/<secret>` files.
#[derive(Debug, Clone)]
pub struct FileVault {
    root: PathBuf,
}

impl FileVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn secret_path(&self, vault: &str, secret: &str) -> Result<PathBuf, VaultError> {
        Ok(self.root.join(validate_name(vault)?).join(validate_name(secret)?))
    }
}

#[async_trait]
impl SecretVault for FileVault {
    async fn get_secret(&self, vault: &str, secret: &str) -> Result<String, VaultError> {
        let path = self.secret_path(vault, secret)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(VaultError::NotFound {
                vault: vault.to_string(),
                secret: secret.to_string(),
            }),
            Err(e) => Err(VaultError::Connection(format!(
                "reading {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
