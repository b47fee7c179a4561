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

//! Removal of files that held secret material.

use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;

const ZERO_CHUNK: [u8; 8192] = [0; 8192];

/// Overwrite `path` with zeros, flush it to disk and unlink it.
///
/// A file that is already gone counts as deleted.
pub async fn secure_delete(path: &Path) -> io::Result<()> {
    let len = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    {
        let mut file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(ZERO_CHUNK.len() as u64) as usize;
            file.write_all(&ZERO_CHUNK[..chunk]).await?;
            remaining -= chunk as u64;
        }
        file.sync_all().await?;
    }

    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
