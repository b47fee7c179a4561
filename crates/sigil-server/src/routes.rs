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

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sigil::{ErrorKind, SignOutcome, SigningRequest};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::AppState;

pub fn router(state: AppState) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route("/sign", post(sign))
        .route("/signature/{task_id}", get(signature))
        .route("/status/{task_id}", get(status))
        .route("/healthz", get(health_check))
        .route("/metrics", get(render_metrics))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn default_wait() -> bool {
    true
}

#[derive(Deserialize)]
struct SignQuery {
    key_id: String,
    task_id: String,
    #[serde(default = "default_wait")]
    wait: bool,
}

#[derive(Debug, Serialize)]
struct SignResponse {
    task_id: String,
    signed: bool,
    outcome: &'static str,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl SignResponse {
    fn from_outcome(task_id: String, outcome: &SignOutcome) -> Self {
        let (error_kind, reason) = match outcome {
            SignOutcome::Signed { .. } => (None, None),
            SignOutcome::Failed { kind, reason, .. } => (Some(kind.as_str()), Some(reason.clone())),
            SignOutcome::Exhausted { reason, .. } => {
                (Some(ErrorKind::Transient.as_str()), Some(reason.clone()))
            }
        };
        Self {
            task_id,
            signed: outcome.is_success(),
            outcome: outcome.as_str(),
            attempts: outcome.attempts(),
            error_kind,
            reason,
        }
    }
}

fn outcome_status(outcome: &SignOutcome) -> StatusCode {
    match outcome {
        SignOutcome::Signed { .. } => StatusCode::OK,
        SignOutcome::Failed {
            kind: ErrorKind::Validation | ErrorKind::Configuration,
            ..
        } => StatusCode::BAD_REQUEST,
        SignOutcome::Failed {
            kind: ErrorKind::NotFound,
            ..
        } => StatusCode::UNPROCESSABLE_ENTITY,
        SignOutcome::Failed { .. } | SignOutcome::Exhausted { .. } => StatusCode::BAD_GATEWAY,
    }
}

async fn sign(
    State(state): State<AppState>,
    Query(query): Query<SignQuery>,
    body: Bytes,
) -> Result<Response, AppError> {
    if body.is_empty() {
        return Err(AppError::BadRequest("request body is empty".to_string()));
    }
    let request = SigningRequest::new(body.to_vec(), query.key_id, query.task_id.clone());

    if !query.wait {
        state.dispatcher.mark_submitted(&query.task_id).await?;
    }
    // Signing runs on its own task so a client disconnect cannot cut the
    // retry sequence short.
    let handle = state.dispatcher.spawn_sign(request);

    if !query.wait {
        let task_id = query.task_id.clone();
        tokio::spawn(async move {
            match handle.await {
                Ok(outcome) if !outcome.is_success() => {
                    warn!(task_id = %task_id, outcome = outcome.as_str(), "Background signing did not succeed");
                }
                Ok(_) => {}
                Err(e) => error!(task_id = %task_id, error = %e, "Background signing task aborted"),
            }
        });
        info!(task_id = %query.task_id, "Signing request accepted");
        let body = SignResponse {
            task_id: query.task_id,
            signed: false,
            outcome: "submitted",
            attempts: 0,
            error_kind: None,
            reason: None,
        };
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let outcome = handle
        .await
        .map_err(|e| AppError::Internal(format!("signing task aborted: {}", e)))?;
    let status = outcome_status(&outcome);
    Ok((status, Json(SignResponse::from_outcome(query.task_id, &outcome))).into_response())
}

async fn signature(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let content = state.dispatcher.retrieve_signature(&task_id).await?;
    Ok(Json(serde_json::json!({ "content": content })))
}

async fn status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    match state.dispatcher.status(&task_id).await? {
        Some(current) => Ok(Json(serde_json::json!({
            "task_id": task_id,
            "state": current.as_str(),
        }))),
        None => Err(AppError::NotFound(task_id)),
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
