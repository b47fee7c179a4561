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

//! Signing dispatch.
//!
//! [`SigningDispatcher`] is the service object behind the two public
//! operations, [`submit_signing_request`](SigningDispatcher::submit_signing_request)
//! and [`retrieve_signature`](SigningDispatcher::retrieve_signature). It is
//! built once with its collaborators injected and shared by reference (or
//! `Arc`) between request handlers.
//!
//! A request whose key id is [`LEGACY_KEY_CODE`] goes to the local legacy
//! signer after the key manager has made sure the identity is imported. Any
//! other key id must be one of the configured key codes and goes to the
//! remote authority. Both paths run under the same [`RetryPolicy`]; on success
//! the signature location is published to the [`ResultStore`] under the
//! request's correlation id.

use crate::config::{SignerConfig, VaultBackend, LEGACY_KEY_CODE};
use crate::error::{ErrorKind, RetrieveError, SignError};
use crate::models::SigningState;
use crate::results::{self, DbResultStore, MemoryResultStore, ResultStore, StoreError};
use crate::retry::{RetryError, RetryPolicy};
use crate::security::{audit, LegacyKeyManager, LegacyKeySource};
use crate::signing::{
    EsrpClientAuthority, EsrpSettings, GpgKeystore, GpgSigner, LegacySigner, RemoteAuthority,
};
use crate::vault::{FileVault, KeyVaultClient, SecretVault, VaultError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// The content to sign.
#[derive(Debug, Clone)]
pub enum SigningContent {
    /// Content held in memory; spooled to a scoped temp file for signing.
    Bytes(Vec<u8>),
    /// Content already on disk. The file is read but never removed.
    File(PathBuf),
}

impl From<Vec<u8>> for SigningContent {
    fn from(bytes: Vec<u8>) -> Self {
        SigningContent::Bytes(bytes)
    }
}

impl From<PathBuf> for SigningContent {
    fn from(path: PathBuf) -> Self {
        SigningContent::File(path)
    }
}

/// One signing request. Lives for the duration of a single dispatch.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub content: SigningContent,
    pub key_id: String,
    pub correlation_id: String,
}

impl SigningRequest {
    pub fn new(
        content: impl Into<SigningContent>,
        key_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            key_id: key_id.into(),
            correlation_id: correlation_id.into(),
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.key_id == LEGACY_KEY_CODE
    }
}

/// Structured result of [`SigningDispatcher::sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    /// A signature was produced and published.
    Signed { location: String, attempts: u32 },
    /// A terminal error stopped the request. `attempts` is 0 when the request
    /// was rejected before any backend call.
    Failed {
        kind: ErrorKind,
        attempts: u32,
        reason: String,
    },
    /// Every allowed attempt failed with a retriable error.
    Exhausted { attempts: u32, reason: String },
}

impl SignOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SignOutcome::Signed { .. })
    }

    /// Number of backend invocations made.
    pub fn attempts(&self) -> u32 {
        match self {
            SignOutcome::Signed { attempts, .. }
            | SignOutcome::Failed { attempts, .. }
            | SignOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignOutcome::Signed { .. } => "signed",
            SignOutcome::Failed { .. } => "failed",
            SignOutcome::Exhausted { .. } => "exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Legacy,
    Remote,
}

impl Backend {
    fn as_str(self) -> &'static str {
        match self {
            Backend::Legacy => "legacy",
            Backend::Remote => "remote",
        }
    }
}

/// Errors building a dispatcher from configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Failed to create vault client: {0}")]
    Vault(#[from] VaultError),

    #[error("Failed to open result store: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Config(String),
}

/// Collaborators injected into a [`SigningDispatcher`].
pub struct DispatcherComponents {
    pub key_manager: Arc<LegacyKeyManager>,
    pub legacy_signer: Arc<dyn LegacySigner>,
    pub authority: Arc<dyn RemoteAuthority>,
    pub store: Arc<dyn ResultStore>,
}

pub struct SigningDispatcher {
    key_manager: Arc<LegacyKeyManager>,
    legacy_signer: Arc<dyn LegacySigner>,
    authority: Arc<dyn RemoteAuthority>,
    store: Arc<dyn ResultStore>,
    retry: RetryPolicy,
    scratch_dir: PathBuf,
    signature_dir: PathBuf,
}

impl std::fmt::Debug for SigningDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningDispatcher")
            .field("key_manager", &self.key_manager)
            .field("retry", &self.retry)
            .field("scratch_dir", &self.scratch_dir)
            .field("signature_dir", &self.signature_dir)
            .finish_non_exhaustive()
    }
}

impl SigningDispatcher {
    pub fn new(
        components: DispatcherComponents,
        retry: RetryPolicy,
        scratch_dir: impl Into<PathBuf>,
        signature_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key_manager: components.key_manager,
            legacy_signer: components.legacy_signer,
            authority: components.authority,
            store: components.store,
            retry,
            scratch_dir: scratch_dir.into(),
            signature_dir: signature_dir.into(),
        }
    }

    /// Wire up the production collaborators described by `config`.
    ///
    /// Uses the database-backed result store when `database_url` is set and
    /// an in-process store otherwise.
    pub async fn from_config(config: &SignerConfig) -> Result<Self, SetupError> {
        let vault: Arc<dyn SecretVault> = match config.vault_backend {
            VaultBackend::KeyVault => {
                Arc::new(KeyVaultClient::new(config.identity_client_id.clone())?)
            }
            VaultBackend::File => {
                let dir = config.vault_dir.clone().ok_or_else(|| {
                    SetupError::Config("vault_dir is required for the file vault".to_string())
                })?;
                Arc::new(FileVault::new(dir))
            }
        };

        let gpg_home = config.resolved_gpg_home();
        let keystore = Arc::new(GpgKeystore::new(&config.gpg_path, &gpg_home));
        let key_manager = Arc::new(LegacyKeyManager::new(
            keystore,
            vault,
            LegacyKeySource {
                vault: config.keyvault.clone(),
                secret: config.legacy_key_path.clone(),
                thumbprint: config.legacy_key_thumbprint.clone(),
            },
            config.key_codes.clone(),
            &config.scratch_dir,
        ));

        let authority = Arc::new(EsrpClientAuthority::new(EsrpSettings {
            client_path: config.esrp_client_path.clone(),
            app_id: config.app_id.clone(),
            tenant_id: config.tenant_id.clone(),
            auth_cert_path: config.auth_cert_path.clone(),
            sign_cert: config.sign_cert.clone(),
            scratch_dir: config.scratch_dir.clone(),
            output_dir: config.signature_dir.clone(),
        }));

        let store: Arc<dyn ResultStore> = match &config.database_url {
            Some(url) => Arc::new(DbResultStore::connect(url, config.db_pool_size).await?),
            None => {
                warn!("No database_url configured; signatures are only retrievable from this process");
                Arc::new(MemoryResultStore::new())
            }
        };

        info!(
            key_codes = config.key_codes.len(),
            vault_backend = %config.vault_backend,
            "Signing dispatcher configured"
        );

        Ok(Self::new(
            DispatcherComponents {
                key_manager,
                legacy_signer: Arc::new(GpgSigner::new(&config.gpg_path, &gpg_home)),
                authority,
                store,
            },
            config.retry_policy(),
            &config.scratch_dir,
            &config.signature_dir,
        ))
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Sign and publish. Never panics or returns an error: every failure is
    /// folded into the returned [`SignOutcome`] and logged.
    pub async fn sign(&self, request: SigningRequest) -> SignOutcome {
        let backend = if request.is_legacy() {
            Backend::Legacy
        } else {
            Backend::Remote
        };
        let correlation_id = request.correlation_id.as_str();
        let key_id = request.key_id.as_str();

        if correlation_id.trim().is_empty() {
            return self
                .reject(&request, backend, ErrorKind::Validation, "empty correlation id")
                .await;
        }
        if key_id.trim().is_empty() {
            return self
                .reject(&request, backend, ErrorKind::Validation, "empty key id")
                .await;
        }
        if backend == Backend::Remote && !self.key_manager.is_permitted(key_id) {
            audit::log_key_code_rejected(correlation_id, key_id);
            let reason = SignError::KeyCodeNotPermitted(key_id.to_string()).to_string();
            return self
                .reject(&request, backend, ErrorKind::Configuration, &reason)
                .await;
        }

        // Keeps a spooled temp file alive until signing is done.
        let (input, _spool) = match self.materialise(&request.content).await {
            Ok(input) => input,
            Err(e) => {
                let kind = e.kind();
                return self.reject(&request, backend, kind, &e.to_string()).await;
            }
        };
        let digest = match &request.content {
            SigningContent::Bytes(bytes) => audit::content_digest(bytes),
            SigningContent::File(_) => match tokio::fs::read(&input).await {
                Ok(bytes) => audit::content_digest(&bytes),
                Err(e) => {
                    let reason = format!("unreadable input {}: {}", input.display(), e);
                    return self
                        .reject(&request, backend, ErrorKind::Validation, &reason)
                        .await;
                }
            },
        };
        audit::log_sign_requested(correlation_id, key_id, backend.as_str(), &digest);

        if let Err(e) = self
            .store
            .set_state(correlation_id, SigningState::InProgress, None)
            .await
        {
            warn!(correlation_id = %correlation_id, error = %e, "Failed to record in-progress state");
        }

        let attempts = AtomicU32::new(0);
        let result = match backend {
            Backend::Legacy => self.run_legacy(&input, &attempts).await,
            Backend::Remote => self.run_remote(&input, key_id, &attempts).await,
        };
        let attempts = attempts.load(Ordering::SeqCst);

        let outcome = match result {
            Ok(location) => match self.store.put(correlation_id, &location).await {
                Ok(()) => {
                    audit::log_sign_succeeded(
                        correlation_id,
                        key_id,
                        backend.as_str(),
                        &location,
                        attempts,
                    );
                    SignOutcome::Signed { location, attempts }
                }
                Err(e) => {
                    remove_signature_file(Path::new(&location), "unpublished").await;
                    SignOutcome::Failed {
                        kind: ErrorKind::Transient,
                        attempts,
                        reason: format!("signature produced but not published: {}", e),
                    }
                }
            },
            Err(RetryError::Terminal { error, .. }) => SignOutcome::Failed {
                kind: error.kind(),
                attempts,
                reason: error.to_string(),
            },
            Err(RetryError::Exhausted { error, .. }) => SignOutcome::Exhausted {
                attempts,
                reason: error.to_string(),
            },
        };

        if !outcome.is_success() {
            self.record_failure(&request, backend, &outcome).await;
        }
        crate::metrics::record_sign_outcome(backend.as_str(), outcome.as_str(), attempts);
        outcome
    }

    /// Boolean form of [`sign`](Self::sign): true exactly when a signature was
    /// published for `correlation_id`.
    pub async fn submit_signing_request(
        &self,
        content: impl Into<SigningContent>,
        key_id: &str,
        correlation_id: &str,
    ) -> bool {
        self.sign(SigningRequest::new(content, key_id, correlation_id))
            .await
            .is_success()
    }

    /// Run [`sign`](Self::sign) on its own task.
    ///
    /// The retry sequence runs to completion or budget exhaustion even if the
    /// returned handle is dropped, so a caller that goes away never leaves a
    /// request stuck in progress.
    pub fn spawn_sign(self: &Arc<Self>, request: SigningRequest) -> JoinHandle<SignOutcome> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.sign(request).await })
    }

    /// Fetch the signature content published for `correlation_id`.
    pub async fn retrieve_signature(&self, correlation_id: &str) -> Result<String, RetrieveError> {
        match results::read_signature(self.store.as_ref(), correlation_id).await {
            Ok(content) => {
                audit::log_signature_retrieved(correlation_id);
                crate::metrics::record_retrieval("found");
                Ok(content)
            }
            Err(e) => {
                audit::log_signature_missing(correlation_id, &e.to_string());
                let outcome = match e {
                    RetrieveError::NotFound(_) => "not_found",
                    RetrieveError::MissingContent { .. } => "missing_content",
                    RetrieveError::Store(_) => "error",
                };
                crate::metrics::record_retrieval(outcome);
                Err(e)
            }
        }
    }

    /// Lifecycle state for `correlation_id`, or `None` if never seen.
    pub async fn status(&self, correlation_id: &str) -> Result<Option<SigningState>, StoreError> {
        self.store.status(correlation_id).await
    }

    /// Record that a request was accepted and will be signed later.
    pub async fn mark_submitted(&self, correlation_id: &str) -> Result<(), StoreError> {
        self.store
            .set_state(correlation_id, SigningState::Submitted, None)
            .await
    }

    async fn run_legacy(
        &self,
        input: &Path,
        attempts: &AtomicU32,
    ) -> Result<String, RetryError<SignError>> {
        tokio::fs::create_dir_all(&self.signature_dir)
            .await
            .map_err(|e| RetryError::Terminal {
                operation: "legacy_sign".to_string(),
                attempts: 0,
                error: SignError::Io(e),
            })?;
        let output = self.signature_dir.join(format!("{}.asc", Uuid::new_v4()));

        let key_manager = self.key_manager.as_ref();
        let signer = self.legacy_signer.as_ref();
        let output_ref = output.as_path();
        let result = self
            .retry
            .execute("legacy_sign", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                key_manager.ensure_legacy_identity().await?;
                signer
                    .detach_sign(key_manager.thumbprint(), input, output_ref)
                    .await
            })
            .await;

        match result {
            Ok(()) => Ok(output.display().to_string()),
            Err(e) => {
                // gpg may leave a partial signature behind.
                remove_signature_file(&output, "partial").await;
                Err(e)
            }
        }
    }

    async fn run_remote(
        &self,
        input: &Path,
        key_id: &str,
        attempts: &AtomicU32,
    ) -> Result<String, RetryError<SignError>> {
        let authority = self.authority.as_ref();
        self.retry
            .execute("remote_sign", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                authority.sign_detached(input, key_id).await
            })
            .await
    }

    /// Resolve the request content to a path on disk. In-memory content is
    /// written to a temp file that lives as long as the returned guard.
    async fn materialise(
        &self,
        content: &SigningContent,
    ) -> Result<(PathBuf, Option<tempfile::TempPath>), SignError> {
        match content {
            SigningContent::File(path) => match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() => Ok((path.clone(), None)),
                Ok(_) => Err(SignError::InvalidRequest(format!(
                    "{} is not a regular file",
                    path.display()
                ))),
                Err(e) => Err(SignError::InvalidRequest(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                ))),
            },
            SigningContent::Bytes(bytes) => {
                tokio::fs::create_dir_all(&self.scratch_dir).await?;
                let temp = tempfile::Builder::new()
                    .prefix("unsigned-")
                    .tempfile_in(&self.scratch_dir)?
                    .into_temp_path();
                tokio::fs::write(&temp, bytes).await?;
                Ok((temp.to_path_buf(), Some(temp)))
            }
        }
    }

    /// Fail a request before any backend call.
    async fn reject(
        &self,
        request: &SigningRequest,
        backend: Backend,
        kind: ErrorKind,
        reason: &str,
    ) -> SignOutcome {
        let outcome = SignOutcome::Failed {
            kind,
            attempts: 0,
            reason: reason.to_string(),
        };
        self.record_failure(request, backend, &outcome).await;
        crate::metrics::record_sign_outcome(backend.as_str(), outcome.as_str(), 0);
        outcome
    }

    async fn record_failure(&self, request: &SigningRequest, backend: Backend, outcome: &SignOutcome) {
        let (kind, attempts, reason) = match outcome {
            SignOutcome::Failed {
                kind,
                attempts,
                reason,
            } => (Some(kind.as_str()), *attempts, reason.as_str()),
            SignOutcome::Exhausted { attempts, reason } => (None, *attempts, reason.as_str()),
            SignOutcome::Signed { .. } => return,
        };

        audit::log_sign_failed(
            &request.correlation_id,
            &request.key_id,
            backend.as_str(),
            kind,
            attempts,
            reason,
        );

        if request.correlation_id.trim().is_empty() {
            return;
        }
        if let Err(e) = self
            .store
            .set_state(&request.correlation_id, SigningState::Failed, Some(reason))
            .await
        {
            warn!(
                correlation_id = %request.correlation_id,
                error = %e,
                "Failed to record failed state"
            );
        }
    }
}

async fn remove_signature_file(path: &Path, what: &str) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove {} signature", what);
        }
    }
}
