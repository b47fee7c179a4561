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

use super::{
    RetrySettings, SignerConfig, ValidationError, VaultBackend, LEGACY_KEY_CODE,
    MAX_THUMBPRINT_LEN, MIN_THUMBPRINT_LEN,
};
use crate::database::BackendType;

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

fn require(errors: &mut Vec<ValidationError>, key: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError::MissingSetting {
            key: key.to_string(),
        });
    }
}

impl Validate for SignerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        // Legacy identity
        if self.legacy_key_thumbprint.is_empty() {
            require(&mut errors, "legacy_key_thumbprint", "");
        } else if !(MIN_THUMBPRINT_LEN..=MAX_THUMBPRINT_LEN)
            .contains(&self.legacy_key_thumbprint.len())
            || !self
                .legacy_key_thumbprint
                .chars()
                .all(|c| c.is_ascii_hexdigit())
        {
            errors.push(ValidationError::InvalidThumbprint {
                thumbprint: self.legacy_key_thumbprint.clone(),
            });
        }
        require(&mut errors, "legacy_key_path", &self.legacy_key_path);
        match self.vault_backend {
            VaultBackend::KeyVault => require(&mut errors, "keyvault", &self.keyvault),
            VaultBackend::File => {
                if self.vault_dir.is_none() {
                    require(&mut errors, "vault_dir", "");
                }
            }
        }

        // Remote authority settings only matter once a key code is configured.
        if !self.key_codes.is_empty() {
            require(&mut errors, "app_id", &self.app_id);
            require(&mut errors, "tenant_id", &self.tenant_id);
            require(&mut errors, "auth_cert_path", &self.auth_cert_path);
            require(&mut errors, "sign_cert", &self.sign_cert);
        }
        if self.key_codes.is_permitted(LEGACY_KEY_CODE) {
            errors.push(ValidationError::ReservedKeyCode {
                code: LEGACY_KEY_CODE.to_string(),
            });
        }

        if let Some(url) = &self.database_url {
            if BackendType::from_url(url).is_err() {
                errors.push(ValidationError::InvalidDatabaseUrl { url: url.clone() });
            }
        }
        if self.db_pool_size == 0 || self.db_pool_size > 100 {
            errors.push(ValidationError::InvalidPoolSize {
                size: self.db_pool_size,
            });
        }

        if let Err(e) = self.retry.validate() {
            errors.push(e);
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple { errors }),
        }
    }
}

impl Validate for RetrySettings {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidRetry {
                message: "max_attempts must be at least 1".to_string(),
            });
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ValidationError::InvalidRetry {
                message: format!(
                    "initial_delay_ms ({}) exceeds max_delay_ms ({})",
                    self.initial_delay_ms, self.max_delay_ms
                ),
            });
        }
        Ok(())
    }
}
