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

//! Database-backed result store.
//!
//! Records live in the `signature_records` table, so every process pointed at
//! the same database sees the same results. Rows are keyed by
//! [`signature_key`], the same naming the in-process store uses. Writes are
//! single-statement upserts: publishing replaces the whole row, while a state
//! transition only touches `state`, `error` and `updated_at`, leaving any
//! previously published location in place.

use super::{ResultStore, StoreError};
use crate::database::schema::signature_records;
use crate::database::{AnyPool, Database};
use crate::models::{signature_key, SignatureRecord, SigningState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = signature_records)]
struct SignatureRow {
    record_key: String,
    correlation_id: String,
    state: String,
    location: Option<String>,
    error: Option<String>,
    updated_at: String,
}

impl From<SignatureRecord> for SignatureRow {
    fn from(record: SignatureRecord) -> Self {
        Self {
            record_key: signature_key(&record.correlation_id),
            correlation_id: record.correlation_id,
            state: record.state.as_str().to_string(),
            location: record.location,
            error: record.error,
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

impl TryFrom<SignatureRow> for SignatureRecord {
    type Error = StoreError;

    fn try_from(row: SignatureRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::CorruptRecord {
            correlation_id: row.correlation_id.clone(),
            reason,
        };
        let state: SigningState = row.state.parse().map_err(|e| corrupt(format!("{}", e)))?;
        let updated_at = DateTime::parse_from_rfc3339(&row.updated_at)
            .map_err(|e| corrupt(format!("bad timestamp: {}", e)))?
            .with_timezone(&Utc);

        Ok(SignatureRecord {
            correlation_id: row.correlation_id,
            state,
            location: row.location,
            error: row.error,
            updated_at,
        })
    }
}

/// Result store shared through PostgreSQL or SQLite.
#[derive(Debug, Clone)]
pub struct DbResultStore {
    database: Database,
}

impl DbResultStore {
    /// Wrap an existing pool. Migrations must already have run.
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Connect, apply migrations and return the store.
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self, StoreError> {
        let database =
            Database::new(url, pool_size).map_err(|e| StoreError::Connection(e.to_string()))?;
        database
            .run_migrations()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self::new(database))
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

macro_rules! upsert_row {
    ($conn:expr, $row:expr) => {
        diesel::insert_into(signature_records::table)
            .values(&$row)
            .on_conflict(signature_records::record_key)
            .do_update()
            .set((
                signature_records::state.eq($row.state.clone()),
                signature_records::location.eq($row.location.clone()),
                signature_records::error.eq($row.error.clone()),
                signature_records::updated_at.eq($row.updated_at.clone()),
            ))
            .execute($conn)
    };
}

macro_rules! transition_row {
    ($conn:expr, $row:expr) => {
        diesel::insert_into(signature_records::table)
            .values(&$row)
            .on_conflict(signature_records::record_key)
            .do_update()
            .set((
                signature_records::state.eq($row.state.clone()),
                signature_records::error.eq($row.error.clone()),
                signature_records::updated_at.eq($row.updated_at.clone()),
            ))
            .execute($conn)
    };
}

macro_rules! find_row {
    ($conn:expr, $key:expr) => {
        signature_records::table
            .find($key)
            .first::<SignatureRow>($conn)
            .optional()
    };
}

/// Run one write statement on whichever backend the pool holds.
macro_rules! write_with {
    ($self:expr, $row:expr, $stmt:ident) => {{
        let row = $row;
        match $self.database.pool() {
            #[cfg(feature = "postgres")]
            AnyPool::Postgres(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
                conn.interact(move |conn| $stmt!(conn, row))
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            }
            #[cfg(feature = "sqlite")]
            AnyPool::Sqlite(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
                conn.interact(move |conn| $stmt!(conn, row))
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            }
        }
        Ok(())
    }};
}

#[async_trait]
impl ResultStore for DbResultStore {
    async fn upsert(&self, record: SignatureRecord) -> Result<(), StoreError> {
        write_with!(self, SignatureRow::from(record), upsert_row)
    }

    async fn set_state(
        &self,
        correlation_id: &str,
        state: SigningState,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let record = SignatureRecord::with_state(correlation_id, state, error.map(str::to_string));
        write_with!(self, SignatureRow::from(record), transition_row)
    }

    async fn record(&self, correlation_id: &str) -> Result<Option<SignatureRecord>, StoreError> {
        let key = signature_key(correlation_id);

        let row = match self.database.pool() {
            #[cfg(feature = "postgres")]
            AnyPool::Postgres(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
                conn.interact(move |conn| find_row!(conn, key))
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?
                    .map_err(|e| StoreError::Database(e.to_string()))?
            }
            #[cfg(feature = "sqlite")]
            AnyPool::Sqlite(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
                conn.interact(move |conn| find_row!(conn, key))
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?
                    .map_err(|e| StoreError::Database(e.to_string()))?
            }
        };

        row.map(SignatureRecord::try_from).transpose()
    }
}
