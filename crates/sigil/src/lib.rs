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

//! # Sigil
//!
//! Sigil produces detached signatures over build-artifact content. Each request
//! is routed either to a locally held legacy signing identity (imported into a
//! GPG keystore on first use) or to a remote enterprise signing authority.
//! Backend calls run under a bounded exponential-backoff [`retry::RetryPolicy`],
//! and successful signatures are published to a shared [`results::ResultStore`]
//! keyed by the caller's correlation id so they can be retrieved later, possibly
//! from another process.
//!
//! ## Components
//!
//! - [`security::LegacyKeyManager`]: idempotent import of the legacy identity
//! - [`retry::RetryPolicy`]: attempt budget, backoff curve and error classification
//! - [`dispatcher::SigningDispatcher`]: backend selection and result publication
//! - [`results`]: in-memory and database-backed result stores
//!
//! ## Example
//!
//! ```rust,ignore
//! use sigil::dispatcher::{SigningDispatcher, SigningRequest};
//!
//! let dispatcher = SigningDispatcher::from_config(&config).await?;
//! let ok = dispatcher
//!     .submit_signing_request(content, "legacy", "task-1234")
//!     .await;
//! if ok {
//!     let armored = dispatcher.retrieve_signature("task-1234").await?;
//! }
//! ```

pub mod config;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod models;
pub mod results;
pub mod retry;
pub mod security;
pub mod signing;
pub mod vault;

pub use config::{KeyCodes, SignerConfig, LEGACY_KEY_CODE};
pub use dispatcher::{SignOutcome, SigningContent, SigningDispatcher, SigningRequest};
pub use error::{ErrorKind, RetrieveError, SignError};
pub use models::{SignatureRecord, SigningState};
pub use results::{MemoryResultStore, ResultStore};
pub use retry::{BackoffStrategy, RetryCondition, RetryError, RetryPolicy};
