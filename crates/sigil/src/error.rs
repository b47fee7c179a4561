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

//! Error types for signing and signature retrieval.
//!
//! Every [`SignError`] carries an [`ErrorKind`] tag. The retry policy decides
//! whether to try again from the tag alone, so a backend only has to pick the
//! right variant for a failure to be retried or surfaced immediately.

use crate::results::StoreError;
use crate::vault::VaultError;
use std::fmt;
use thiserror::Error;

/// Classification of a signing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request named a key code outside the configured set.
    Configuration,
    /// The signing authority or vault rejected our credentials.
    Authentication,
    /// The request or a collaborator's response was malformed.
    Validation,
    /// A named secret or record does not exist.
    NotFound,
    /// Network hiccups, service errors and non-zero tool exits.
    Transient,
}

impl ErrorKind {
    /// Terminal kinds abort a retry sequence on first occurrence.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ErrorKind::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while producing a signature.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("Key code '{0}' is not in the list of supported keys")]
    KeyCodeNotPermitted(String),

    #[error("Authentication with the signing authority failed: {0}")]
    Authentication(String),

    #[error("Invalid signing request: {0}")]
    InvalidRequest(String),

    #[error("Secret vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Keystore import failed (exit code {code:?}): {stderr}")]
    KeyImportFailed { code: Option<i32>, stderr: String },

    #[error("Signing tool exited with code {code:?}: {stderr}")]
    ToolFailed { code: Option<i32>, stderr: String },

    #[error("Signing authority error: {0}")]
    Authority(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),
}

impl SignError {
    /// Map this error onto the retry taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SignError::KeyCodeNotPermitted(_) => ErrorKind::Configuration,
            SignError::Authentication(_) => ErrorKind::Authentication,
            SignError::InvalidRequest(_) => ErrorKind::Validation,
            SignError::Vault(e) => e.kind(),
            SignError::KeyImportFailed { .. }
            | SignError::ToolFailed { .. }
            | SignError::Authority(_)
            | SignError::Io(_)
            | SignError::Store(_) => ErrorKind::Transient,
        }
    }

    pub fn is_retriable(&self) -> bool {
        !self.kind().is_terminal()
    }
}

/// Errors returned when fetching a previously produced signature.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// No signed record exists for the correlation id. Pending, failed and
    /// never-submitted requests all land here.
    #[error("No signature recorded for '{0}'")]
    NotFound(String),

    /// A record exists but the file it points at cannot be read.
    #[error("Signature content at '{location}' is unreadable: {source}")]
    MissingContent {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),
}
