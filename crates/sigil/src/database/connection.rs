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

//! Connection pool management supporting both PostgreSQL and SQLite.
//!
//! Pools are built with `deadpool-diesel`. The backend is detected from the
//! connection string:
//!
//! - `postgres://` or `postgresql://` selects PostgreSQL
//! - `sqlite://`, `file:` URIs, file paths and `:memory:` select SQLite
//!
//! # Example
//!
//! ```rust,ignore
//! use sigil::database::Database;
//!
//! let db = Database::new("sqlite:///var/lib/sigil/results.db", 4)?;
//! db.run_migrations().await?;
//! ```

use thiserror::Error;
use tracing::info;

#[cfg(feature = "postgres")]
use deadpool_diesel::postgres::{Manager as PgManager, Pool as PgPool, Runtime as PgRuntime};

#[cfg(feature = "sqlite")]
use deadpool_diesel::sqlite::{
    Manager as SqliteManager, Pool as SqlitePool, Runtime as SqliteRuntime,
};

/// Errors raised while building pools or preparing the schema.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Unable to detect database backend from URL '{0}'. Expected postgres://, postgresql://, sqlite://, or a file path.")]
    UnknownBackend(String),

    #[error("The {0:?} backend is not enabled in this build")]
    BackendDisabled(BackendType),

    #[error("Invalid database URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to create connection pool: {0}")]
    Pool(String),

    #[error("Failed to obtain a connection: {0}")]
    Connection(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Database backend, detected at runtime from the connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Postgres,
    Sqlite,
}

impl BackendType {
    /// Detect the backend type from a connection URL.
    pub fn from_url(url: &str) -> Result<Self, DatabaseError> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(BackendType::Postgres);
        }

        if url.starts_with("sqlite://")
            || url.starts_with("file:")
            || url.starts_with('/')
            || url.starts_with("./")
            || url.starts_with("../")
            || url == ":memory:"
            || url.ends_with(".db")
            || url.ends_with(".sqlite")
            || url.ends_with(".sqlite3")
        {
            return Ok(BackendType::Sqlite);
        }

        Err(DatabaseError::UnknownBackend(url.to_string()))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendType::Postgres => "postgres",
            BackendType::Sqlite => "sqlite",
        }
    }
}

/// Pool enum wrapping whichever backends this build enables.
#[derive(Clone)]
pub enum AnyPool {
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
    #[cfg(feature = "sqlite")]
    Sqlite(SqlitePool),
}

impl std::fmt::Debug for AnyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "postgres")]
            AnyPool::Postgres(_) => write!(f, "AnyPool::Postgres(...)"),
            #[cfg(feature = "sqlite")]
            AnyPool::Sqlite(_) => write!(f, "AnyPool::Sqlite(...)"),
        }
    }
}

/// A shared pool of database connections.
///
/// `Database` is `Clone`; every clone references the same underlying pool.
#[derive(Clone, Debug)]
pub struct Database {
    pool: AnyPool,
    backend: BackendType,
}

impl Database {
    /// Creates a connection pool with automatic backend detection.
    ///
    /// SQLite pools are pinned to a single connection to avoid "database is
    /// locked" errors; `max_size` applies to PostgreSQL only.
    pub fn new(connection_string: &str, max_size: usize) -> Result<Self, DatabaseError> {
        let backend = BackendType::from_url(connection_string)?;

        match backend {
            #[cfg(feature = "postgres")]
            BackendType::Postgres => {
                let connection_url = Self::build_postgres_url(connection_string)?;
                let manager = PgManager::new(connection_url, PgRuntime::Tokio1);
                let pool = PgPool::builder(manager)
                    .max_size(max_size.max(1))
                    .build()
                    .map_err(|e| DatabaseError::Pool(e.to_string()))?;

                info!(max_size = max_size.max(1), "PostgreSQL connection pool initialized");
                Ok(Self {
                    pool: AnyPool::Postgres(pool),
                    backend,
                })
            }
            #[cfg(feature = "sqlite")]
            BackendType::Sqlite => {
                let connection_url = Self::build_sqlite_url(connection_string);
                let manager = SqliteManager::new(connection_url, SqliteRuntime::Tokio1);
                let pool = SqlitePool::builder(manager)
                    .max_size(1)
                    .build()
                    .map_err(|e| DatabaseError::Pool(e.to_string()))?;

                info!("SQLite connection pool initialized (size: 1)");
                Ok(Self {
                    pool: AnyPool::Sqlite(pool),
                    backend,
                })
            }
            #[allow(unreachable_patterns)]
            other => Err(DatabaseError::BackendDisabled(other)),
        }
    }

    pub fn backend(&self) -> BackendType {
        self.backend
    }

    /// Returns a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    #[cfg(feature = "postgres")]
    fn build_postgres_url(base_url: &str) -> Result<String, DatabaseError> {
        let url = url::Url::parse(base_url).map_err(|e| DatabaseError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if url.path().trim_start_matches('/').is_empty() {
            return Err(DatabaseError::InvalidUrl {
                url: base_url.to_string(),
                reason: "missing database name".to_string(),
            });
        }
        Ok(url.to_string())
    }

    /// Strips the `sqlite://` prefix if present.
    fn build_sqlite_url(connection_string: &str) -> String {
        connection_string
            .strip_prefix("sqlite://")
            .unwrap_or(connection_string)
            .to_string()
    }

    /// Runs pending migrations for the detected backend.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        use diesel_migrations::MigrationHarness;

        match &self.pool {
            #[cfg(feature = "postgres")]
            AnyPool::Postgres(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;
                conn.interact(|conn| {
                    conn.run_pending_migrations(crate::database::POSTGRES_MIGRATIONS)
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                })
                .await
                .map_err(|e| DatabaseError::Migration(e.to_string()))?
                .map_err(DatabaseError::Migration)?;
            }
            #[cfg(feature = "sqlite")]
            AnyPool::Sqlite(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;
                conn.interact(|conn| {
                    use diesel::prelude::*;

                    // WAL lets readers proceed during writes; busy_timeout waits on locks.
                    diesel::sql_query("PRAGMA journal_mode=WAL;")
                        .execute(conn)
                        .map_err(|e| e.to_string())?;
                    diesel::sql_query("PRAGMA busy_timeout=30000;")
                        .execute(conn)
                        .map_err(|e| e.to_string())?;

                    conn.run_pending_migrations(crate::database::SQLITE_MIGRATIONS)
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                })
                .await
                .map_err(|e| DatabaseError::Migration(e.to_string()))?
                .map_err(DatabaseError::Migration)?;
            }
        }

        info!(backend = self.backend.as_str(), "Database migrations applied");
        Ok(())
    }
}
