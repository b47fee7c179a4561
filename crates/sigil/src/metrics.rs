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

//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade; without an installed recorder
//! every call is a no-op. The server installs a Prometheus recorder.

use ::metrics::{counter, histogram};

/// Metric names used by the signing core.
pub mod names {
    /// Signing requests, labeled by backend and outcome.
    pub const SIGN_REQUESTS_TOTAL: &str = "sigil_sign_requests_total";
    /// Backend invocations per signing request.
    pub const SIGN_ATTEMPTS: &str = "sigil_sign_attempts";
    /// Retries scheduled, labeled by operation.
    pub const RETRIES_TOTAL: &str = "sigil_retries_total";
    /// Retry sequences that ran out of attempts, labeled by operation.
    pub const RETRIES_EXHAUSTED_TOTAL: &str = "sigil_retries_exhausted_total";
    /// Legacy key imports into the local keystore.
    pub const LEGACY_KEY_IMPORTS_TOTAL: &str = "sigil_legacy_key_imports_total";
    /// Signature retrievals, labeled by outcome.
    pub const SIGNATURE_RETRIEVALS_TOTAL: &str = "sigil_signature_retrievals_total";
}

pub fn record_sign_outcome(backend: &'static str, outcome: &'static str, attempts: u32) {
    counter!(names::SIGN_REQUESTS_TOTAL, "backend" => backend, "outcome" => outcome).increment(1);
    histogram!(names::SIGN_ATTEMPTS, "backend" => backend).record(f64::from(attempts));
}

pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_retry_exhausted(operation: &str) {
    counter!(names::RETRIES_EXHAUSTED_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_legacy_key_import() {
    counter!(names::LEGACY_KEY_IMPORTS_TOTAL).increment(1);
}

pub fn record_retrieval(outcome: &'static str) {
    counter!(names::SIGNATURE_RETRIEVALS_TOTAL, "outcome" => outcome).increment(1);
}
