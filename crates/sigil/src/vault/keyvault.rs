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

//! Cloud key vault client authenticated through the instance metadata service.

use super::{validate_name, SecretVault, VaultError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Managed-identity token endpoint on the link-local metadata address.
pub const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

const IMDS_API_VERSION: &str = "2021-02-01";
const VAULT_RESOURCE: &str = "https://vault.azure.net";
const SECRETS_API_VERSION: &str = "2016-10-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SecretBundle {
    value: Option<String>,
}

/// Fetches secrets from `https://<vault>.vault.azure.net`.
///
/// Each call obtains a fresh bearer token from the metadata identity
/// endpoint, optionally scoped to a user-assigned identity's client id.
#[derive(Debug, Clone)]
pub struct KeyVaultClient {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: Option<String>,
    vault_base_url: Option<String>,
}

impl KeyVaultClient {
    pub fn new(client_id: Option<String>) -> Result<Self, VaultError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| VaultError::Connection(e.to_string()))?;
        Ok(Self {
            http,
            token_endpoint: IMDS_TOKEN_ENDPOINT.to_string(),
            client_id,
            vault_base_url: None,
        })
    }

    /// Override the token endpoint, e.g. for a local identity emulator.
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }

    /// Send secret requests to a fixed base URL instead of the per-vault host.
    pub fn with_vault_base_url(mut self, base: impl Into<String>) -> Self {
        self.vault_base_url = Some(base.into());
        self
    }

    fn token_url(&self) -> Result<url::Url, VaultError> {
        let mut url = url::Url::parse(&self.token_endpoint)
            .map_err(|e| VaultError::InvalidResponse(format!("bad token endpoint: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api-version", IMDS_API_VERSION);
            query.append_pair("resource", VAULT_RESOURCE);
            if let Some(client_id) = &self.client_id {
                query.append_pair("client_id", client_id);
            }
        }
        Ok(url)
    }

    fn secret_url(&self, vault: &str, secret: &str) -> Result<String, VaultError> {
        let vault = validate_name(vault)?;
        let secret = validate_name(secret)?;
        let base = match &self.vault_base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}.vault.azure.net", vault),
        };
        Ok(format!(
            "{}/secrets/{}?api-version={}",
            base, secret, SECRETS_API_VERSION
        ))
    }

    async fn access_token(&self) -> Result<String, VaultError> {
        let response = self
            .http
            .get(self.token_url()?)
            .header("Metadata", "true")
            .send()
            .await
            .map_err(|e| VaultError::Connection(format!("token request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body, None));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| VaultError::InvalidResponse(format!("token response: {}", e)))?;
        Ok(token.access_token)
    }
}

/// Map a non-success HTTP status onto a vault error.
fn classify_status(status: StatusCode, body: String, missing: Option<(&str, &str)>) -> VaultError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            VaultError::Unauthorized(format!("{} {}", status, body))
        }
        StatusCode::NOT_FOUND => match missing {
            Some((vault, secret)) => VaultError::NotFound {
                vault: vault.to_string(),
                secret: secret.to_string(),
            },
            None => VaultError::Connection(format!("{} {}", status, body)),
        },
        StatusCode::BAD_REQUEST => VaultError::InvalidResponse(format!("{} {}", status, body)),
        _ => VaultError::Connection(format!("{} {}", status, body)),
    }
}

#[async_trait]
impl SecretVault for KeyVaultClient {
    async fn get_secret(&self, vault: &str, secret: &str) -> Result<String, VaultError> {
        let url = self.secret_url(vault, secret)?;
        let token = self.access_token().await?;

        debug!(vault = %vault, secret = %secret, "Fetching secret from key vault");
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| VaultError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body, Some((vault, secret))));
        }

        let bundle: SecretBundle = response
            .json()
            .await
            .map_err(|e| VaultError::InvalidResponse(e.to_string()))?;
        bundle
            .value
            .ok_or_else(|| VaultError::InvalidResponse("secret bundle has no value".to_string()))
    }
}
