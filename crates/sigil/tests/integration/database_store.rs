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

//! Sharing results between dispatchers through the database-backed store.

use crate::fakes::{Harness, Script};
use sigil::results::{DbResultStore, ResultStore};
use sigil::SigningState;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_signature_visible_from_another_dispatcher() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("results.db");
    let url = db_path.to_str().unwrap().to_string();

    let writer_store: Arc<dyn ResultStore> =
        Arc::new(DbResultStore::connect(&url, 1).await.unwrap());
    let writer = Harness::with_store(Script::Succeed, Script::Succeed, writer_store, dir);

    assert!(
        writer
            .dispatcher
            .submit_signing_request(b"shared payload".to_vec(), "legacy", "task-shared")
            .await
    );

    let reader_store: Arc<dyn ResultStore> =
        Arc::new(DbResultStore::connect(&url, 1).await.unwrap());
    let reader = Harness::with_store(
        Script::Succeed,
        Script::Succeed,
        reader_store,
        TempDir::new().unwrap(),
    );

    let content = reader
        .dispatcher
        .retrieve_signature("task-shared")
        .await
        .unwrap();
    assert!(content.contains("shared payload"));
    assert_eq!(
        reader.dispatcher.status("task-shared").await.unwrap(),
        Some(SigningState::Signed)
    );
    assert_eq!(reader.legacy.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}
