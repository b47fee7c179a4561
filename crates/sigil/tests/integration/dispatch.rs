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

//! Backend selection, retry behaviour and result publication.

use crate::fakes::{Harness, Script, UnpublishableStore, PERMITTED_CODE};
use sigil::{ErrorKind, RetrieveError, RetryPolicy, SignOutcome, SigningRequest, SigningState};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_legacy_sign_publishes_retrievable_record() {
    let h = Harness::new(Script::Succeed, Script::Succeed);

    let ok = h
        .dispatcher
        .submit_signing_request(b"rpm payload".to_vec(), "legacy", "task-legacy")
        .await;
    assert!(ok);

    let content = h.dispatcher.retrieve_signature("task-legacy").await.unwrap();
    assert!(content.starts_with("-----BEGIN PGP SIGNATURE-----"));
    assert!(content.contains("rpm payload"));
    assert_eq!(
        h.dispatcher.status("task-legacy").await.unwrap(),
        Some(SigningState::Signed)
    );
    assert_eq!(h.keystore.imports.load(Ordering::SeqCst), 1);
    assert_eq!(h.authority.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_remote_sign_publishes_retrievable_record() {
    let h = Harness::new(Script::Succeed, Script::Succeed);

    let outcome = h
        .dispatcher
        .sign(SigningRequest::new(
            b"deb payload".to_vec(),
            PERMITTED_CODE,
            "task-remote",
        ))
        .await;
    assert!(matches!(outcome, SignOutcome::Signed { attempts: 1, .. }));

    let content = h.dispatcher.retrieve_signature("task-remote").await.unwrap();
    assert!(content.contains("deb payload"));
    assert_eq!(h.legacy.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.vault.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_makes_exactly_ten_attempts() {
    let h = Harness::new(Script::Succeed, Script::AlwaysTransient);
    let start = tokio::time::Instant::now();

    let outcome = h
        .dispatcher
        .sign(SigningRequest::new(b"x".to_vec(), PERMITTED_CODE, "task-ex"))
        .await;

    match outcome {
        SignOutcome::Exhausted { attempts, .. } => assert_eq!(attempts, 10),
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(h.authority.calls.load(Ordering::SeqCst), 10);
    // 1 + 2 + 4 + 8 + 16 + 32 + 60 + 60 + 60 seconds of backoff.
    assert!(start.elapsed() >= Duration::from_secs(243));

    assert_eq!(
        h.dispatcher.status("task-ex").await.unwrap(),
        Some(SigningState::Failed)
    );
    assert!(matches!(
        h.dispatcher.retrieve_signature("task-ex").await,
        Err(RetrieveError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_success_on_tenth_attempt() {
    let h = Harness::new(Script::FailTransient(9), Script::Succeed);

    let outcome = h
        .dispatcher
        .sign(SigningRequest::new(b"x".to_vec(), "legacy", "task-10"))
        .await;

    assert!(matches!(outcome, SignOutcome::Signed { attempts: 10, .. }));
    assert_eq!(h.legacy.calls.load(Ordering::SeqCst), 10);
    // The identity is imported once, then found present on every retry.
    assert_eq!(h.keystore.imports.load(Ordering::SeqCst), 1);
    assert!(h.dispatcher.retrieve_signature("task-10").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_authentication_error_short_circuits() {
    let h = Harness::new(Script::Succeed, Script::Authentication);
    let start = tokio::time::Instant::now();

    let outcome = h
        .dispatcher
        .sign(SigningRequest::new(b"x".to_vec(), PERMITTED_CODE, "task-auth"))
        .await;

    match outcome {
        SignOutcome::Failed { kind, attempts, .. } => {
            assert_eq!(kind, ErrorKind::Authentication);
            assert_eq!(attempts, 1);
        }
        other => panic!("expected terminal failure, got {other:?}"),
    }
    assert_eq!(h.authority.calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn test_unlisted_key_code_is_rejected_before_remote_call() {
    let h = Harness::new(Script::Succeed, Script::Succeed);

    let outcome = h
        .dispatcher
        .sign(SigningRequest::new(b"x".to_vec(), "CP-999999-Pgp", "task-bad"))
        .await;

    assert!(matches!(
        outcome,
        SignOutcome::Failed {
            kind: ErrorKind::Configuration,
            attempts: 0,
            ..
        }
    ));
    assert_eq!(h.authority.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.dispatcher.status("task-bad").await.unwrap(),
        Some(SigningState::Failed)
    );
}

#[tokio::test]
async fn test_empty_ids_are_validation_failures() {
    let h = Harness::new(Script::Succeed, Script::Succeed);

    let outcome = h
        .dispatcher
        .sign(SigningRequest::new(b"x".to_vec(), "legacy", ""))
        .await;
    assert!(matches!(
        outcome,
        SignOutcome::Failed {
            kind: ErrorKind::Validation,
            ..
        }
    ));

    assert!(
        !h.dispatcher
            .submit_signing_request(b"x".to_vec(), "", "task-nokey")
            .await
    );
    assert_eq!(h.legacy.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_legacy_import_happens_once_across_requests() {
    let h = Harness::new(Script::Succeed, Script::Succeed);

    for id in ["a", "b", "c"] {
        assert!(
            h.dispatcher
                .submit_signing_request(b"x".to_vec(), "legacy", id)
                .await
        );
    }

    assert_eq!(h.vault.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(h.keystore.imports.load(Ordering::SeqCst), 1);
    assert_eq!(h.legacy.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_missing_vault_secret_is_terminal() {
    let h = Harness::new(Script::Succeed, Script::Succeed);
    h.vault.missing.store(true, Ordering::SeqCst);

    let outcome = h
        .dispatcher
        .sign(SigningRequest::new(b"x".to_vec(), "legacy", "task-novault"))
        .await;

    assert!(matches!(
        outcome,
        SignOutcome::Failed {
            kind: ErrorKind::NotFound,
            attempts: 1,
            ..
        }
    ));
    assert_eq!(h.legacy.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_import_leaves_no_key_material() {
    let h = Harness::with_policy(
        Script::Succeed,
        Script::Succeed,
        RetryPolicy::builder().max_attempts(3).initial_delay(Duration::ZERO).build(),
    );
    h.keystore.fail_imports.store(true, Ordering::SeqCst);

    let outcome = h
        .dispatcher
        .sign(SigningRequest::new(b"x".to_vec(), "legacy", "task-import"))
        .await;

    assert!(matches!(outcome, SignOutcome::Exhausted { attempts: 3, .. }));
    assert_eq!(h.keystore.imports.load(Ordering::SeqCst), 3);
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn test_spooled_input_is_removed_after_signing() {
    let h = Harness::new(Script::Succeed, Script::Succeed);

    assert!(
        h.dispatcher
            .submit_signing_request(b"x".to_vec(), PERMITTED_CODE, "task-spool")
            .await
    );
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn test_file_input_is_signed_and_kept() {
    let h = Harness::new(Script::Succeed, Script::Succeed);
    let input = h.dir.path().join("package.rpm");
    std::fs::write(&input, b"on-disk payload").unwrap();

    let outcome = h
        .dispatcher
        .sign(SigningRequest::new(input.clone(), "legacy", "task-file"))
        .await;

    assert!(outcome.is_success());
    assert!(input.exists());
    let content = h.dispatcher.retrieve_signature("task-file").await.unwrap();
    assert!(content.contains("on-disk payload"));
}

#[tokio::test]
async fn test_missing_input_file_is_validation_failure() {
    let h = Harness::new(Script::Succeed, Script::Succeed);

    let outcome = h
        .dispatcher
        .sign(SigningRequest::new(
            h.dir.path().join("absent.rpm"),
            "legacy",
            "task-nofile",
        ))
        .await;

    assert!(matches!(
        outcome,
        SignOutcome::Failed {
            kind: ErrorKind::Validation,
            attempts: 0,
            ..
        }
    ));
}

#[tokio::test]
async fn test_last_write_wins() {
    let h = Harness::new(Script::Succeed, Script::Succeed);

    assert!(
        h.dispatcher
            .submit_signing_request(b"first".to_vec(), "legacy", "task-lww")
            .await
    );
    assert!(
        h.dispatcher
            .submit_signing_request(b"second".to_vec(), PERMITTED_CODE, "task-lww")
            .await
    );

    let content = h.dispatcher.retrieve_signature("task-lww").await.unwrap();
    assert!(content.contains("second"));
    assert!(!content.contains("first"));
}

#[tokio::test]
async fn test_rejected_resign_keeps_published_signature() {
    let h = Harness::new(Script::Succeed, Script::Succeed);

    assert!(
        h.dispatcher
            .submit_signing_request(b"first".to_vec(), PERMITTED_CODE, "task-keep")
            .await
    );
    assert!(
        !h.dispatcher
            .submit_signing_request(b"second".to_vec(), "CP-UNLISTED", "task-keep")
            .await
    );

    let content = h.dispatcher.retrieve_signature("task-keep").await.unwrap();
    assert!(content.contains("first"));
    assert_eq!(
        h.dispatcher.status("task-keep").await.unwrap(),
        Some(SigningState::Failed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_published_signature_survives_running_and_failed_resign() {
    let h = Harness::new(Script::Succeed, Script::AlwaysTransient);

    assert!(
        h.dispatcher
            .submit_signing_request(b"first".to_vec(), "legacy", "task-resign")
            .await
    );

    let handle = h.dispatcher.spawn_sign(SigningRequest::new(
        b"second".to_vec(),
        PERMITTED_CODE,
        "task-resign",
    ));
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(
        h.dispatcher.status("task-resign").await.unwrap(),
        Some(SigningState::InProgress)
    );
    let content = h.dispatcher.retrieve_signature("task-resign").await.unwrap();
    assert!(content.contains("first"));

    assert!(matches!(handle.await.unwrap(), SignOutcome::Exhausted { .. }));
    assert_eq!(
        h.dispatcher.status("task-resign").await.unwrap(),
        Some(SigningState::Failed)
    );
    let content = h.dispatcher.retrieve_signature("task-resign").await.unwrap();
    assert!(content.contains("first"));
}

#[tokio::test(start_paused = true)]
async fn test_spawned_sign_finishes_after_caller_goes_away() {
    let h = Harness::new(Script::Succeed, Script::AlwaysTransient);

    let handle = h.dispatcher.spawn_sign(SigningRequest::new(
        b"x".to_vec(),
        PERMITTED_CODE,
        "task-abandoned",
    ));
    assert!(tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .is_err());

    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(h.authority.calls.load(Ordering::SeqCst), 10);
    assert_eq!(
        h.dispatcher.status("task-abandoned").await.unwrap(),
        Some(SigningState::Failed)
    );
}

#[tokio::test]
async fn test_unpublished_signature_file_is_removed() {
    let store = Arc::new(UnpublishableStore::default());
    let h = Harness::with_store(
        Script::Succeed,
        Script::Succeed,
        store,
        tempfile::TempDir::new().unwrap(),
    );

    let outcome = h
        .dispatcher
        .sign(SigningRequest::new(b"x".to_vec(), "legacy", "task-unpublished"))
        .await;

    assert!(matches!(
        outcome,
        SignOutcome::Failed {
            kind: ErrorKind::Transient,
            attempts: 1,
            ..
        }
    ));
    assert_eq!(h.legacy.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.signature_entries(), 0);
    assert_eq!(
        h.dispatcher.status("task-unpublished").await.unwrap(),
        Some(SigningState::Failed)
    );
}
