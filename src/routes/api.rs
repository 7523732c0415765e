// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{ActivityQuery, SyncJob, SyncJobParams};
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

const MAX_PER_PAGE: u32 = 200;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sync-jobs", get(list_sync_jobs).post(create_sync_job))
        .route("/api/sync-jobs/{id}", get(get_sync_job))
        .route("/api/activities", get(get_activities))
}

// ─── Sync Jobs ───────────────────────────────────────────────

/// Sync job as shown to its owner.
#[derive(Serialize)]
pub struct SyncJobResponse {
    #[serde(flatten)]
    pub job: SyncJob,
    /// Waiting on a worker for longer than expected
    pub stuck: bool,
}

impl From<SyncJob> for SyncJobResponse {
    fn from(job: SyncJob) -> Self {
        let stuck = job.is_stuck(Utc::now());
        Self { job, stuck }
    }
}

#[derive(Serialize)]
pub struct SyncJobsResponse {
    pub jobs: Vec<SyncJobResponse>,
}

/// Queue a sync of the caller's activities.
async fn create_sync_job(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    body: Bytes,
) -> Result<(StatusCode, Json<SyncJobResponse>)> {
    // The body is optional; no body means default parameters.
    let params: SyncJobParams = if body.is_empty() {
        SyncJobParams::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid sync job parameters: {}", e)))?
    };

    let job = state
        .orchestrator
        .create_sync_job(user.user_id, params)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// The caller's sync jobs, newest first.
async fn list_sync_jobs(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SyncJobsResponse>> {
    let jobs = state
        .orchestrator
        .get_sync_jobs_by_user(user.user_id)
        .await?;

    Ok(Json(SyncJobsResponse {
        jobs: jobs.into_iter().map(SyncJobResponse::from).collect(),
    }))
}

async fn get_sync_job(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<SyncJobResponse>> {
    let job = state.orchestrator.get_sync_job(&id).await?;

    // Someone else's job looks the same as a missing one.
    if job.user_id != user.user_id {
        return Err(AppError::NotFound(format!("Sync job {}", id)));
    }

    Ok(Json(job.into()))
}

// ─── Activities ──────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct ActivitiesQuery {
    pub has_details: Option<bool>,
    /// RFC3339; only activities that started after this
    pub after: Option<DateTime<Utc>>,
    /// RFC3339; only activities that started before this
    pub before: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    #[validate(range(min = 1))]
    pub page: u32,
    #[serde(default = "default_per_page")]
    #[validate(range(min = 1, max = 200))]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    50
}

#[derive(Serialize)]
pub struct ActivitiesResponse {
    pub activities: Vec<ActivitySummary>,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Serialize)]
pub struct ActivitySummary {
    pub id: u64,
    pub name: Option<String>,
    pub sport_type: Option<String>,
    pub start_date: Option<String>,
    pub has_details: bool,
}

/// Get the caller's mirrored activities, newest first.
async fn get_activities(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<ActivitiesQuery>,
) -> Result<Json<ActivitiesResponse>> {
    params.validate()?;

    tracing::debug!(
        user_id = user.user_id,
        has_details = ?params.has_details,
        after = ?params.after,
        page = params.page,
        "Fetching activities"
    );

    let per_page = params.per_page.min(MAX_PER_PAGE);
    let offset = (params.page - 1)
        .checked_mul(per_page)
        .ok_or_else(|| AppError::BadRequest("Page number causes overflow".to_string()))?;

    let query = ActivityQuery {
        has_details: params.has_details,
        after: params.after,
        before: params.before,
        limit: per_page,
        offset,
    };

    let activities = state
        .activities
        .list_for_user(user.user_id, &query)
        .await?
        .into_iter()
        .map(|a| ActivitySummary {
            id: a.strava_id,
            name: a.data.get("name").and_then(|v| v.as_str()).map(String::from),
            sport_type: a
                .data
                .get("sport_type")
                .and_then(|v| v.as_str())
                .map(String::from),
            start_date: a.start_date.map(format_utc_rfc3339),
            has_details: a.has_details,
        })
        .collect();

    Ok(Json(ActivitiesResponse {
        activities,
        page: params.page,
        per_page,
    }))
}
