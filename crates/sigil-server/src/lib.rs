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

//! HTTP surface for the Sigil signing dispatcher.
//!
//! | Method | Path | |
//! |---|---|---|
//! | `POST` | `/sign?key_id=&task_id=[&wait=false]` | sign the request body |
//! | `GET` | `/signature/{task_id}` | `{"content": ...}` or 404 |
//! | `GET` | `/status/{task_id}` | lifecycle state or 404 |
//! | `GET` | `/healthz` | liveness |
//! | `GET` | `/metrics` | Prometheus exposition |
//!
//! With `wait=false` the request is recorded as submitted, signed on a
//! background task, and answered with `202 Accepted` immediately; callers
//! then poll `/status` or `/signature`.

pub mod error;
mod routes;

pub use error::AppError;
pub use routes::router;

use metrics_exporter_prometheus::PrometheusHandle;
use sigil::SigningDispatcher;
use std::sync::Arc;

/// Largest request body accepted by `POST /sign`.
pub const DEFAULT_BODY_LIMIT: usize = 512 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<SigningDispatcher>,
    pub metrics: Option<PrometheusHandle>,
    pub body_limit: usize,
}

impl AppState {
    pub fn new(dispatcher: Arc<SigningDispatcher>) -> Self {
        Self {
            dispatcher,
            metrics: None,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}
