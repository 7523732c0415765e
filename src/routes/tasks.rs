// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Task handler routes for Cloud Tasks callbacks.
//!
//! These endpoints are called by Cloud Tasks, not directly by users. The
//! status code is the acknowledgement: 2xx removes the task from the queue,
//! anything else has it delivered again.

use crate::error::AppError;
use crate::services::jobs::{SyncUserTask, TaskOutcome};
use crate::AppState;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use std::sync::Arc;

/// Task handler routes (called by Cloud Tasks).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/tasks/sync-user", post(sync_user))
}

/// Run one queued sync job.
async fn sync_user(
    State(state): State<Arc<AppState>>,
    Json(task): Json<SyncUserTask>,
) -> StatusCode {
    tracing::info!(
        sync_job_id = %task.sync_job_id,
        user_id = task.user_id,
        "Processing sync job from Cloud Task"
    );

    match state.orchestrator.process_task(&task).await {
        Ok(TaskOutcome::Completed(_)) | Ok(TaskOutcome::AlreadyFinished(_)) => StatusCode::OK,
        // The failure is recorded on the job; a fresh job is the way to retry.
        Ok(TaskOutcome::Failed(_)) => StatusCode::OK,
        Err(AppError::NotFound(msg)) => {
            // Job deleted or never written - don't retry
            tracing::warn!(
                sync_job_id = %task.sync_job_id,
                %msg,
                "Sync job not found, dropping task"
            );
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!(
                sync_job_id = %task.sync_job_id,
                error = %e,
                "Failed to record sync job outcome"
            );
            // Return 500 to trigger Cloud Tasks retry
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
