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

use super::{ConfigError, KeyCodes, SignerConfig, Validate};
use regex::Regex;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    load_dotenv: bool,
}

impl ConfigLoader {
    /// Create a loader with the default search paths.
    pub fn new() -> Self {
        Self {
            search_paths: vec![
                PathBuf::from("./sigil.toml"),
                PathBuf::from("/etc/sigil/config.toml"),
            ],
            load_dotenv: true,
        }
    }

    /// Create a loader with custom search paths.
    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            load_dotenv: true,
        }
    }

    /// Skip reading `.env` from the working directory.
    pub fn without_dotenv(mut self) -> Self {
        self.load_dotenv = false;
        self
    }

    /// Load, override from the environment and validate.
    ///
    /// An explicitly named file must exist. Without one, `SIGIL_CONFIG` and
    /// then the search paths are consulted; if nothing is found the built-in
    /// defaults are used.
    pub fn load(&self, config_file: Option<&Path>) -> Result<SignerConfig, ConfigError> {
        if self.load_dotenv {
            match dotenvy::dotenv() {
                Ok(path) => debug!(path = %path.display(), "Loaded .env file"),
                Err(e) if e.not_found() => {}
                Err(e) => {
                    return Err(ConfigError::EnvSubstitutionError(format!(
                        "failed to load .env: {}",
                        e
                    )))
                }
            }
        }

        let config_path = match config_file {
            Some(path) => Some(path.to_path_buf()),
            None => env::var("SIGIL_CONFIG")
                .ok()
                .map(PathBuf::from)
                .or_else(|| self.find_config_file()),
        };

        let mut config = match config_path {
            Some(path) => {
                info!(path = %path.display(), "Loading signer configuration");
                self.load_config_from_file(&path)?
            }
            None => SignerConfig::default(),
        };

        apply_env_overrides(&mut config, |key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, without overrides or validation.
    pub fn load_config_from_file(&self, path: &Path) -> Result<SignerConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let substituted_content = substitute_env_vars(&content)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") | None => Ok(toml::from_str::<SignerConfig>(&substituted_content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat {
                extension: ext.to_string(),
            }),
        }
    }

    /// Find the first existing configuration file in search paths.
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .find(|path| path.is_file())
            .cloned()
    }

    pub fn get_search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Substitute `${VAR}`, `${VAR:-default}` and `${VAR:?message}` references.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::EnvSubstitutionError(e.to_string()))?;
    let mut result = content.to_string();

    for cap in re.captures_iter(content) {
        let full_match = &cap[0];
        let replacement = process_var_expression(&cap[1])?;
        result = result.replace(full_match, &replacement);
    }

    Ok(result)
}

fn process_var_expression(expr: &str) -> Result<String, ConfigError> {
    if let Some((var_name, default_value)) = expr.split_once(":-") {
        Ok(env::var(var_name).unwrap_or_else(|_| default_value.to_string()))
    } else if let Some((var_name, error_msg)) = expr.split_once(":?") {
        env::var(var_name).map_err(|_| {
            ConfigError::EnvSubstitutionError(format!(
                "Required environment variable '{}' is not set: {}",
                var_name, error_msg
            ))
        })
    } else {
        env::var(expr).map_err(|_| {
            ConfigError::EnvSubstitutionError(format!(
                "Required environment variable '{}' is not set",
                expr
            ))
        })
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Apply environment overrides on top of file or default settings.
pub(crate) fn apply_env_overrides<F>(config: &mut SignerConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("KEYVAULT") {
        config.keyvault = v;
    }
    if let Some(v) = lookup("AUTH_CERT_PATH") {
        config.auth_cert_path = v;
    }
    if let Some(v) = lookup("SIGN_CERT") {
        config.sign_cert = v;
    }
    if let Some(v) = lookup("LEGACY_KEY_PATH") {
        config.legacy_key_path = v;
    }
    if let Some(v) = lookup("APP_ID") {
        config.app_id = v;
    }
    if let Some(v) = lookup("TENANT_ID") {
        config.tenant_id = v;
    }
    if let Some(v) = lookup("KEY_CODES") {
        config.key_codes = KeyCodes::parse(&v);
    }
    if let Some(v) = lookup("LEGACY_KEY_THUMBPRINT") {
        config.legacy_key_thumbprint = v.trim().to_string();
    }
    if let Some(v) = lookup("DATABASE_URL") {
        config.database_url = Some(v);
    }
    if let Some(v) = lookup("SIGIL_DB_POOL_SIZE") {
        config.db_pool_size = parse_value("SIGIL_DB_POOL_SIZE", &v)?;
    }
    if let Some(v) = lookup("SIGIL_SCRATCH_DIR") {
        config.scratch_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("SIGIL_SIGNATURE_DIR") {
        config.signature_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("SIGIL_GPG_PATH") {
        config.gpg_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("GNUPGHOME") {
        config.gpg_home = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("SIGIL_ESRP_CLIENT") {
        config.esrp_client_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("SIGIL_VAULT_BACKEND") {
        config.vault_backend = v.parse()?;
    }
    if let Some(v) = lookup("SIGIL_VAULT_DIR") {
        config.vault_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("SIGIL_IDENTITY_CLIENT_ID") {
        config.identity_client_id = Some(v);
    }
    if let Some(v) = lookup("SIGIL_RETRY_MAX_ATTEMPTS") {
        config.retry.max_attempts = parse_value("SIGIL_RETRY_MAX_ATTEMPTS", &v)?;
    }
    if let Some(v) = lookup("SIGIL_RETRY_INITIAL_DELAY_MS") {
        config.retry.initial_delay_ms = parse_value("SIGIL_RETRY_INITIAL_DELAY_MS", &v)?;
    }
    if let Some(v) = lookup("SIGIL_RETRY_MAX_DELAY_MS") {
        config.retry.max_delay_ms = parse_value("SIGIL_RETRY_MAX_DELAY_MS", &v)?;
    }
    Ok(())
}
