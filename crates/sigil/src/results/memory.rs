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

//! In-process result store.

use super::{ResultStore, StoreError};
use crate::models::{signature_key, SignatureRecord, SigningState};
use chrono::Utc;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Result store backed by a process-local map.
///
/// Clones share the same map. Records are invisible to other processes, so
/// this store only suits tests and single-instance development setups.
#[derive(Debug, Clone, Default)]
pub struct MemoryResultStore {
    records: Arc<RwLock<HashMap<String, SignatureRecord>>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn upsert(&self, record: SignatureRecord) -> Result<(), StoreError> {
        let key = signature_key(&record.correlation_id);
        self.records.write().insert(key, record);
        Ok(())
    }

    async fn set_state(
        &self,
        correlation_id: &str,
        state: SigningState,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write();
        records
            .entry(signature_key(correlation_id))
            .and_modify(|record| {
                record.state = state;
                record.error = error.map(str::to_string);
                record.updated_at = Utc::now();
            })
            .or_insert_with(|| {
                SignatureRecord::with_state(correlation_id, state, error.map(str::to_string))
            });
        Ok(())
    }

    async fn record(&self, correlation_id: &str) -> Result<Option<SignatureRecord>, StoreError> {
        Ok(self.records.read().get(&signature_key(correlation_id)).cloned())
    }
}
