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

//! Remote signing through the enterprise authority's command-line client.
//!
//! Each request gets a scoped working directory holding the authentication,
//! policy and input descriptors the client expects. The directory is removed
//! when the call returns, whatever the outcome.

use super::process::run_command;
use super::RemoteAuthority;
use crate::error::SignError;
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Substrings in client output that mean our credentials were rejected.
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "aadsts",
    "authentication failed",
    "unauthorized",
    "certificate is not authorized",
    "invalid client certificate",
];

/// Operation code requesting a detached signature.
const DETACHED_SIGN_OPERATION: &str = "LinuxSign";

/// Identity and locations used to drive the authority client.
#[derive(Debug, Clone)]
pub struct EsrpSettings {
    pub client_path: PathBuf,
    pub app_id: String,
    pub tenant_id: String,
    pub auth_cert_path: String,
    pub sign_cert: String,
    /// Parent for per-request working directories.
    pub scratch_dir: PathBuf,
    /// Where produced signatures are written.
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EsrpClientAuthority {
    settings: EsrpSettings,
}

impl EsrpClientAuthority {
    pub fn new(settings: EsrpSettings) -> Self {
        Self { settings }
    }

    fn auth_descriptor(&self) -> serde_json::Value {
        json!({
            "Version": "1.0.0",
            "AuthenticationType": "AAD_CERT",
            "TenantId": self.settings.tenant_id,
            "ClientId": self.settings.app_id,
            "AuthCert": {
                "SubjectName": self.settings.auth_cert_path,
                "StoreLocation": "LocalMachine",
                "StoreName": "My",
            },
            "RequestSigningCert": {
                "SubjectName": self.settings.sign_cert,
                "StoreLocation": "LocalMachine",
                "StoreName": "My",
            }
        })
    }

    fn policy_descriptor(&self) -> serde_json::Value {
        json!({
            "Version": "1.0.0",
            "Intent": "detached-sign",
            "ContentType": "Linux",
        })
    }

    fn input_descriptor(&self, input: &Path, output: &Path, key_id: &str) -> serde_json::Value {
        json!({
            "Version": "1.0.0",
            "SignBatches": [{
                "SourceLocationType": "UNC",
                "DestinationLocationType": "UNC",
                "SignRequestFiles": [{
                    "SourceLocation": input.display().to_string(),
                    "DestinationLocation": output.display().to_string(),
                }],
                "SigningInfo": {
                    "Operations": [{
                        "KeyCode": key_id,
                        "OperationCode": DETACHED_SIGN_OPERATION,
                        "Parameters": {},
                        "ToolName": "sign",
                        "ToolVersion": "1.0",
                    }]
                }
            }]
        })
    }
}

/// Map a failed client run onto the error taxonomy.
fn classify_failure(code: Option<i32>, stdout: &str, stderr: &str) -> SignError {
    let combined = format!("{}\n{}", stdout, stderr).to_lowercase();
    if AUTH_FAILURE_MARKERS
        .iter()
        .any(|marker| combined.contains(marker))
    {
        SignError::Authentication(stderr.trim().to_string())
    } else {
        SignError::Authority(format!("client exited with {:?}: {}", code, stderr.trim()))
    }
}

async fn write_json(path: &Path, value: &serde_json::Value) -> Result<(), SignError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| SignError::InvalidRequest(format!("descriptor encoding: {}", e)))?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[async_trait]
impl RemoteAuthority for EsrpClientAuthority {
    async fn sign_detached(&self, input: &Path, key_id: &str) -> Result<String, SignError> {
        if key_id.trim().is_empty() {
            return Err(SignError::InvalidRequest("empty key code".to_string()));
        }

        tokio::fs::create_dir_all(&self.settings.scratch_dir).await?;
        tokio::fs::create_dir_all(&self.settings.output_dir).await?;
        let work_dir = tempfile::Builder::new()
            .prefix("esrp-")
            .tempdir_in(&self.settings.scratch_dir)?;

        let output = self
            .settings
            .output_dir
            .join(format!("{}.asc", Uuid::new_v4()));
        let auth = work_dir.path().join("auth.json");
        let policy = work_dir.path().join("policy.json");
        let request = work_dir.path().join("input.json");
        let result = work_dir.path().join("result.json");

        write_json(&auth, &self.auth_descriptor()).await?;
        write_json(&policy, &self.policy_descriptor()).await?;
        write_json(&request, &self.input_descriptor(input, &output, key_id)).await?;

        debug!(key_id = %key_id, "Submitting detached-sign request to signing authority");
        let run = run_command(
            &self.settings.client_path,
            [
                Path::new("sign").as_os_str(),
                Path::new("-a").as_os_str(),
                auth.as_os_str(),
                Path::new("-p").as_os_str(),
                policy.as_os_str(),
                Path::new("-i").as_os_str(),
                request.as_os_str(),
                Path::new("-o").as_os_str(),
                result.as_os_str(),
            ],
        )
        .await?;

        if !run.success {
            return Err(classify_failure(run.code, &run.stdout, &run.stderr));
        }
        if !tokio::fs::try_exists(&output).await? {
            return Err(SignError::Authority(
                "client reported success but produced no signature".to_string(),
            ));
        }

        info!(key_id = %key_id, location = %output.display(), "Signing authority produced signature");
        Ok(output.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn settings(root: &Path, client: PathBuf) -> EsrpSettings {
        EsrpSettings {
            client_path: client,
            app_id: "app-id".into(),
            tenant_id: "tenant-id".into(),
            auth_cert_path: "CN=sigil-auth".into(),
            sign_cert: "CN=sigil-sign".into(),
            scratch_dir: root.join("scratch"),
            output_dir: root.join("signatures"),
        }
    }

    #[test]
    fn test_classify_failure() {
        let err = classify_failure(Some(1), "", "AADSTS700027: Client assertion failed");
        assert_eq!(err.kind(), ErrorKind::Authentication);

        let err = classify_failure(Some(1), "Request was Unauthorized", "");
        assert_eq!(err.kind(), ErrorKind::Authentication);

        let err = classify_failure(Some(1), "", "503 Service Unavailable");
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_input_descriptor_carries_key_code() {
        let authority = EsrpClientAuthority::new(settings(Path::new("/srv"), "esrp".into()));
        let value = authority.input_descriptor(
            Path::new("/srv/in"),
            Path::new("/srv/out.asc"),
            "CP-450779-Pgp",
        );
        let operation = &value["SignBatches"][0]["SigningInfo"]["Operations"][0];
        assert_eq!(operation["KeyCode"], "CP-450779-Pgp");
        assert_eq!(operation["OperationCode"], DETACHED_SIGN_OPERATION);
        assert_eq!(
            value["SignBatches"][0]["SignRequestFiles"][0]["DestinationLocation"],
            "/srv/out.asc"
        );
    }

    #[tokio::test]
    async fn test_empty_key_code_is_invalid() {
        let dir = tempfile::TempDir::new().unwrap();
        let authority = EsrpClientAuthority::new(settings(dir.path(), "esrp".into()));
        let err = authority
            .sign_detached(Path::new("/tmp/in"), " ")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fake_client_round() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let client = dir.path().join("esrp-client");
        // Copies the destination named in the input descriptor into place.
        std::fs::write(
            &client,
            "#!/bin/sh\nout=$(grep -o '\"DestinationLocation\": \"[^\"]*\"' \"$7\" | cut -d'\"' -f4)\necho sig > \"$out\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&client, std::fs::Permissions::from_mode(0o755)).unwrap();

        let authority = EsrpClientAuthority::new(settings(dir.path(), client));
        let location = authority
            .sign_detached(Path::new("/tmp/in"), "CP-450779-Pgp")
            .await
            .unwrap();

        assert!(location.starts_with(dir.path().join("signatures").to_str().unwrap()));
        assert!(Path::new(&location).exists());
        // The per-request working directory is gone.
        assert_eq!(
            std::fs::read_dir(dir.path().join("scratch")).unwrap().count(),
            0
        );
    }
}
