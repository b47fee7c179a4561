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

//! Domain model for published signature records.
//!
//! A record maps a caller-supplied correlation id to the location of the
//! detached signature produced for it, together with the request's lifecycle
//! state. Records are upserted: the latest write for a correlation id wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Suffix appended to correlation ids to form store keys.
const SIGNATURE_KEY_SUFFIX: &str = "_signature";

/// Store key holding the signature record for a correlation id.
pub fn signature_key(correlation_id: &str) -> String {
    format!("{correlation_id}{SIGNATURE_KEY_SUFFIX}")
}

/// Lifecycle of a signing request as seen by the result store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningState {
    /// Accepted but not yet picked up.
    Submitted,
    /// A backend call (or its retries) is running.
    InProgress,
    /// A signature was produced and its location recorded.
    Signed,
    /// The latest request failed. An earlier published signature, if any,
    /// stays retrievable.
    Failed,
}

impl SigningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningState::Submitted => "submitted",
            SigningState::InProgress => "in_progress",
            SigningState::Signed => "signed",
            SigningState::Failed => "failed",
        }
    }

    /// Whether no further transitions are expected for this request.
    pub fn is_final(&self) -> bool {
        matches!(self, SigningState::Signed | SigningState::Failed)
    }
}

impl fmt::Display for SigningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown signing state: {0}")]
pub struct UnknownStateError(pub String);

impl FromStr for SigningState {
    type Err = UnknownStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(SigningState::Submitted),
            "in_progress" => Ok(SigningState::InProgress),
            "signed" => Ok(SigningState::Signed),
            "failed" => Ok(SigningState::Failed),
            other => Err(UnknownStateError(other.to_string())),
        }
    }
}

/// The authoritative record for one correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub correlation_id: String,
    pub state: SigningState,
    /// Where the most recently published signature lives. Written only on
    /// publication and kept across later state transitions.
    pub location: Option<String>,
    /// Diagnostic for the `Failed` state.
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SignatureRecord {
    /// A fresh record in a non-`Signed` state.
    pub fn with_state(correlation_id: &str, state: SigningState, error: Option<String>) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            state,
            location: None,
            error,
            updated_at: Utc::now(),
        }
    }

    /// A record pointing at a produced signature.
    pub fn signed(correlation_id: &str, location: &str) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            state: SigningState::Signed,
            location: Some(location.to_string()),
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Location of the last published signature, whatever the current state.
    pub fn signed_location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}
