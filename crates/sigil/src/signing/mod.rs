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

//! Signing backends.
//!
//! External processes and services sit behind three traits so the dispatcher
//! and key manager can be exercised with fakes:
//!
//! - [`Keystore`]: the host keystore holding the legacy identity
//! - [`LegacySigner`]: the local detached-signature utility
//! - [`RemoteAuthority`]: the enterprise signing authority
//!
//! The production implementations drive `gpg` ([`GpgKeystore`],
//! [`GpgSigner`]) and the authority's command-line client
//! ([`EsrpClientAuthority`]).

mod esrp;
mod gpg;
pub mod process;

pub use esrp::{EsrpClientAuthority, EsrpSettings};
pub use gpg::{GpgKeystore, GpgSigner};
pub use process::{run_command, CommandOutput};

use crate::error::SignError;
use async_trait::async_trait;
use std::path::Path;

/// Host keystore holding secret keys.
#[async_trait]
pub trait Keystore: Send + Sync {
    /// Whether a secret key with this thumbprint is present.
    ///
    /// An `Err` means the keystore could not be listed, not that the key is
    /// absent.
    async fn has_secret_key(&self, thumbprint: &str) -> Result<bool, SignError>;

    /// Import an armored private key from `key_file`.
    async fn import_key(&self, key_file: &Path) -> Result<(), SignError>;
}

/// Local utility producing detached signatures with an imported identity.
#[async_trait]
pub trait LegacySigner: Send + Sync {
    /// Write an armored detached signature over `input` to `output`.
    async fn detach_sign(
        &self,
        thumbprint: &str,
        input: &Path,
        output: &Path,
    ) -> Result<(), SignError>;
}

/// Remote enterprise signing authority.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Produce a detached signature over `input` with `key_id` and return
    /// where it was stored.
    ///
    /// Credential rejections must surface as [`SignError::Authentication`];
    /// anything else the authority reports is retried.
    async fn sign_detached(&self, input: &Path, key_id: &str) -> Result<String, SignError>;
}
