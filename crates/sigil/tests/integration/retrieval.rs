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

//! Retrieval and status reporting.

use crate::fakes::{Harness, Script};
use sigil::{RetrieveError, ResultStore, SigningState};

#[tokio::test]
async fn test_unknown_correlation_id_is_not_found() {
    let h = Harness::new(Script::Succeed, Script::Succeed);

    match h.dispatcher.retrieve_signature("never-submitted").await {
        Err(RetrieveError::NotFound(id)) => assert_eq!(id, "never-submitted"),
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert_eq!(h.dispatcher.status("never-submitted").await.unwrap(), None);
}

#[tokio::test]
async fn test_submitted_request_is_distinguishable() {
    let h = Harness::new(Script::Succeed, Script::Succeed);

    h.dispatcher.mark_submitted("task-queued").await.unwrap();

    assert!(matches!(
        h.dispatcher.retrieve_signature("task-queued").await,
        Err(RetrieveError::NotFound(_))
    ));
    assert_eq!(
        h.dispatcher.status("task-queued").await.unwrap(),
        Some(SigningState::Submitted)
    );
}

#[tokio::test]
async fn test_deleted_signature_file_is_missing_content() {
    let h = Harness::new(Script::Succeed, Script::Succeed);
    assert!(
        h.dispatcher
            .submit_signing_request(b"x".to_vec(), "legacy", "task-gone")
            .await
    );

    let location = h.store.get("task-gone").await.unwrap().unwrap();
    std::fs::remove_file(&location).unwrap();

    match h.dispatcher.retrieve_signature("task-gone").await {
        Err(RetrieveError::MissingContent { location: l, .. }) => assert_eq!(l, location),
        other => panic!("expected MissingContent, got {other:?}"),
    }
}
