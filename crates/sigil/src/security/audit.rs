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

//! Security audit logging for SIEM integration.
//!
//! Every signing request, legacy key operation and signature retrieval emits
//! one structured event with a dotted `event_type` field. Events go through
//! `tracing` at a level matching their severity.

use sha2::{Digest, Sha256};

/// Event types.
pub mod events {
    pub const SIGN_REQUESTED: &str = "sign.requested";
    pub const SIGN_SUCCEEDED: &str = "sign.succeeded";
    pub const SIGN_FAILED: &str = "sign.failed";

    pub const KEY_LEGACY_PRESENT: &str = "key.legacy.present";
    pub const KEY_LEGACY_IMPORTED: &str = "key.legacy.imported";
    pub const KEY_LEGACY_IMPORT_FAILED: &str = "key.legacy.import_failed";
    /// A non-legacy key id outside the configured key codes.
    pub const KEY_CODE_REJECTED: &str = "key.code.rejected";

    pub const SIGNATURE_RETRIEVED: &str = "signature.retrieved";
    pub const SIGNATURE_MISSING: &str = "signature.missing";
}

/// Hex SHA-256 of request content, for correlating audit events with artifacts.
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Log an accepted signing request.
pub fn log_sign_requested(correlation_id: &str, key_id: &str, backend: &str, content_sha256: &str) {
    tracing::info!(
        event_type = events::SIGN_REQUESTED,
        correlation_id = %correlation_id,
        key_id = %key_id,
        backend = %backend,
        content_sha256 = %content_sha256,
        "Signing requested"
    );
}

/// Log a published signature.
pub fn log_sign_succeeded(
    correlation_id: &str,
    key_id: &str,
    backend: &str,
    location: &str,
    attempts: u32,
) {
    tracing::info!(
        event_type = events::SIGN_SUCCEEDED,
        correlation_id = %correlation_id,
        key_id = %key_id,
        backend = %backend,
        location = %location,
        attempts = attempts,
        "Signature published"
    );
}

/// Log a signing failure. `kind` is `None` when retries were exhausted.
pub fn log_sign_failed(
    correlation_id: &str,
    key_id: &str,
    backend: &str,
    kind: Option<&str>,
    attempts: u32,
    error: &str,
) {
    tracing::error!(
        event_type = events::SIGN_FAILED,
        correlation_id = %correlation_id,
        key_id = %key_id,
        backend = %backend,
        error_kind = kind.unwrap_or("exhausted"),
        attempts = attempts,
        error = %error,
        "Signing failed"
    );
}

pub fn log_legacy_key_present(thumbprint: &str) {
    tracing::debug!(
        event_type = events::KEY_LEGACY_PRESENT,
        key_thumbprint = %thumbprint,
        "Legacy signing key already in keystore"
    );
}

/// Log an import of the legacy key into the local keystore.
pub fn log_legacy_key_imported(thumbprint: &str, vault: &str, secret: &str) {
    tracing::warn!(
        event_type = events::KEY_LEGACY_IMPORTED,
        key_thumbprint = %thumbprint,
        vault = %vault,
        secret = %secret,
        "Legacy signing key imported into keystore"
    );
}

pub fn log_legacy_key_import_failed(thumbprint: &str, error: &str) {
    tracing::error!(
        event_type = events::KEY_LEGACY_IMPORT_FAILED,
        key_thumbprint = %thumbprint,
        error = %error,
        "Failed to import legacy signing key"
    );
}

pub fn log_key_code_rejected(correlation_id: &str, key_id: &str) {
    tracing::error!(
        event_type = events::KEY_CODE_REJECTED,
        correlation_id = %correlation_id,
        key_id = %key_id,
        "Key code is not in the list of supported keys"
    );
}

pub fn log_signature_retrieved(correlation_id: &str) {
    tracing::info!(
        event_type = events::SIGNATURE_RETRIEVED,
        correlation_id = %correlation_id,
        "Signature retrieved"
    );
}

pub fn log_signature_missing(correlation_id: &str, reason: &str) {
    tracing::warn!(
        event_type = events::SIGNATURE_MISSING,
        correlation_id = %correlation_id,
        reason = %reason,
        "Signature not available"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct StringWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for StringWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for StringWriter {
        type Writer = StringWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn with_captured_logs<F>(f: F) -> String
    where
        F: FnOnce(),
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = StringWriter(buffer.clone());

        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, f);

        let output = buffer.lock().unwrap().clone();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn test_log_sign_succeeded() {
        let output = with_captured_logs(|| {
            log_sign_succeeded("task-42", "legacy", "legacy", "/srv/sigs/x.asc", 3);
        });

        assert!(output.contains(events::SIGN_SUCCEEDED));
        assert!(output.contains("task-42"));
        assert!(output.contains("/srv/sigs/x.asc"));
        assert!(output.contains("attempts=3"));
    }

    #[test]
    fn test_log_sign_failed_exhausted() {
        let output = with_captured_logs(|| {
            log_sign_failed("task-7", "CP-1", "remote", None, 10, "503");
        });

        assert!(output.contains(events::SIGN_FAILED));
        assert!(output.contains("error_kind=\"exhausted\"") || output.contains("error_kind=exhausted"));
        assert!(output.contains("ERROR"));
    }

    #[test]
    fn test_log_key_code_rejected() {
        let output = with_captured_logs(|| log_key_code_rejected("task-9", "CP-unknown"));
        assert!(output.contains(events::KEY_CODE_REJECTED));
        assert!(output.contains("CP-unknown"));
    }

    #[test]
    fn test_log_legacy_key_present_is_debug() {
        let output = with_captured_logs(|| log_legacy_key_present("E4F3A2B1"));
        assert!(output.contains("DEBUG"));
        assert!(output.contains("E4F3A2B1"));
    }

    #[test]
    fn test_content_digest() {
        assert_eq!(
            content_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_event_type_constants() {
        assert!(events::SIGN_REQUESTED.starts_with("sign."));
        assert!(events::KEY_LEGACY_IMPORTED.starts_with("key."));
        assert!(events::SIGNATURE_MISSING.starts_with("signature."));
    }
}
