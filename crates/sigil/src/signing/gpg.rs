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

//! GnuPG-backed keystore and legacy signer.

use super::process::run_command;
use super::{Keystore, LegacySigner};
use crate::config::MIN_THUMBPRINT_LEN;
use crate::error::SignError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Whether a `--with-colons` secret key listing contains `thumbprint`.
///
/// Matches full fingerprints or their long key id suffix on `fpr` records and
/// long key ids on `sec`/`ssb` records, ignoring case. Short key ids never
/// match, since they collide too easily.
fn listing_contains(listing: &str, thumbprint: &str) -> bool {
    let wanted = thumbprint.trim().to_ascii_uppercase();
    if wanted.len() < MIN_THUMBPRINT_LEN {
        return false;
    }

    listing.lines().any(|line| {
        let fields: Vec<&str> = line.split(':').collect();
        match fields.first().copied() {
            Some("fpr") => fields
                .get(9)
                .is_some_and(|fpr| fpr.to_ascii_uppercase().ends_with(&wanted)),
            Some("sec") | Some("ssb") => fields
                .get(4)
                .is_some_and(|keyid| keyid.to_ascii_uppercase() == wanted),
            _ => false,
        }
    })
}

fn base_args(home: &Path) -> Vec<OsString> {
    vec![
        "--homedir".into(),
        home.as_os_str().to_owned(),
        "--batch".into(),
    ]
}

/// The local GnuPG keystore.
#[derive(Debug, Clone)]
pub struct GpgKeystore {
    gpg_path: PathBuf,
    home: PathBuf,
}

impl GpgKeystore {
    pub fn new(gpg_path: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            gpg_path: gpg_path.into(),
            home: home.into(),
        }
    }
}

#[async_trait]
impl Keystore for GpgKeystore {
    async fn has_secret_key(&self, thumbprint: &str) -> Result<bool, SignError> {
        let mut args = base_args(&self.home);
        args.push("--with-colons".into());
        args.push("--list-secret-keys".into());

        let output = run_command(&self.gpg_path, &args).await?;
        if !output.success {
            return Err(SignError::ToolFailed {
                code: output.code,
                stderr: output.stderr,
            });
        }
        Ok(listing_contains(&output.stdout, thumbprint))
    }

    async fn import_key(&self, key_file: &Path) -> Result<(), SignError> {
        let mut args = base_args(&self.home);
        args.push("--yes".into());
        args.push("--import".into());
        args.push(key_file.as_os_str().to_owned());

        let output = run_command(&self.gpg_path, &args).await?;
        if !output.success {
            warn!(code = ?output.code, "gpg --import failed");
            return Err(SignError::KeyImportFailed {
                code: output.code,
                stderr: output.stderr,
            });
        }
        debug!("gpg --import succeeded");
        Ok(())
    }
}

/// Produces armored detached signatures with `gpg --detach-sign`.
#[derive(Debug, Clone)]
pub struct GpgSigner {
    gpg_path: PathBuf,
    home: PathBuf,
}

impl GpgSigner {
    pub fn new(gpg_path: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            gpg_path: gpg_path.into(),
            home: home.into(),
        }
    }

    fn sign_args(&self, thumbprint: &str, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--quiet".into()];
        args.extend(base_args(&self.home));
        args.extend([
            "--yes".into(),
            "--detach-sign".into(),
            "--default-key".into(),
            thumbprint.into(),
            "--armor".into(),
            "--output".into(),
            output.as_os_str().to_owned(),
            input.as_os_str().to_owned(),
        ]);
        args
    }
}

#[async_trait]
impl LegacySigner for GpgSigner {
    async fn detach_sign(
        &self,
        thumbprint: &str,
        input: &Path,
        output: &Path,
    ) -> Result<(), SignError> {
        let result = run_command(&self.gpg_path, self.sign_args(thumbprint, input, output)).await?;
        if result.success {
            Ok(())
        } else {
            Err(SignError::ToolFailed {
                code: result.code,
                stderr: result.stderr,
            })
        }
    }
}
