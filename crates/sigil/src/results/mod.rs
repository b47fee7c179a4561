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

//! Result stores for produced signatures.
//!
//! A [`ResultStore`] maps correlation ids to [`SignatureRecord`]s. It must be
//! reachable from every process that serves retrieval requests, because a
//! caller may poll a different instance than the one that signed. The
//! database-backed [`DbResultStore`] satisfies that; [`MemoryResultStore`] is
//! limited to a single process and is meant for tests and local development.
//!
//! Writes are upserts with single-key atomicity. Only [`ResultStore::put`]
//! changes a record's location, so a published signature stays retrievable
//! while a later request for the same id is pending or after it fails. There
//! is no TTL: record lifetime belongs to the store's operator.

mod database;
mod memory;

pub use database::DbResultStore;
pub use memory::MemoryResultStore;

use crate::error::RetrieveError;
use crate::models::{SignatureRecord, SigningState};
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Errors raised by result store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt record for '{correlation_id}': {reason}")]
    CorruptRecord {
        correlation_id: String,
        reason: String,
    },
}

/// Shared mapping from correlation id to signature record.
///
/// Implementations provide [`upsert`](ResultStore::upsert),
/// [`set_state`](ResultStore::set_state) and [`record`](ResultStore::record);
/// the string-valued protocol (`put`/`get`/`exists`) is layered on top.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Replace whatever is stored for the record's correlation id.
    async fn upsert(&self, record: SignatureRecord) -> Result<(), StoreError>;

    /// Fetch the full record, in any state.
    async fn record(&self, correlation_id: &str) -> Result<Option<SignatureRecord>, StoreError>;

    /// Publish a produced signature's location. Last write wins.
    async fn put(&self, correlation_id: &str, location: &str) -> Result<(), StoreError> {
        self.upsert(SignatureRecord::signed(correlation_id, location))
            .await
    }

    /// Location of the produced signature, or `None` when nothing has been
    /// signed under this id.
    async fn get(&self, correlation_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .record(correlation_id)
            .await?
            .and_then(|record| record.signed_location().map(str::to_string)))
    }

    async fn exists(&self, correlation_id: &str) -> Result<bool, StoreError> {
        Ok(self.get(correlation_id).await?.is_some())
    }

    /// Record a non-`Signed` lifecycle state. A previously published location
    /// is kept; only [`put`](ResultStore::put) replaces it.
    async fn set_state(
        &self,
        correlation_id: &str,
        state: SigningState,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Lifecycle state, or `None` for ids this store has never seen.
    async fn status(&self, correlation_id: &str) -> Result<Option<SigningState>, StoreError> {
        Ok(self.record(correlation_id).await?.map(|record| record.state))
    }
}

/// Read the signature content recorded for `correlation_id`.
///
/// A missing or unsigned record is [`RetrieveError::NotFound`]; a record whose
/// file cannot be read is [`RetrieveError::MissingContent`].
pub async fn read_signature(
    store: &dyn ResultStore,
    correlation_id: &str,
) -> Result<String, RetrieveError> {
    let location = store
        .get(correlation_id)
        .await?
        .ok_or_else(|| RetrieveError::NotFound(correlation_id.to_string()))?;

    debug!(correlation_id = %correlation_id, location = %location, "Reading signature");
    tokio::fs::read_to_string(&location)
        .await
        .map_err(|source| RetrieveError::MissingContent { location, source })
}
