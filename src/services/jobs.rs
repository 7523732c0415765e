// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync job orchestration.
//!
//! Requests never run a sync inline. `create_sync_job` records the job and
//! hands it to the task queue; the worker side (`process_task`) drives the
//! job through `started` and into `completed` or `failed` around one
//! engine run.
//!
//! Creating a job is two writes that are not atomic: the job record, then
//! the queued task. If the enqueue fails the job stays in `created` with
//! nothing to pick it up. That is logged and the error returned to the
//! caller; the job shows up as stuck once it has sat there long enough.

use crate::db::{SyncJobStore, UserStore};
use crate::error::{AppError, Result};
use crate::models::{SyncJob, SyncJobError, SyncJobParams, SyncJobStatus, SyncJobUpdate, SyncResult};
use crate::services::sync::SyncEngine;
use crate::services::tasks::TaskQueue;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

/// Task name for a queued sync run (also the `/tasks/` route suffix).
pub const SYNC_USER_TASK: &str = "sync-user";

/// Payload of a queued sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncUserTask {
    pub sync_job_id: String,
    pub user_id: u64,
    #[serde(default)]
    pub params: SyncJobParams,
}

/// What a delivered task ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(SyncResult),
    Failed(SyncJobError),
    /// Redelivery of a task whose job had already finished; nothing was run.
    AlreadyFinished(SyncJobStatus),
}

/// Creates sync jobs and runs them when their task is delivered.
pub struct JobOrchestrator {
    jobs: Arc<dyn SyncJobStore>,
    users: Arc<dyn UserStore>,
    queue: Arc<dyn TaskQueue>,
    engine: SyncEngine,
}

impl JobOrchestrator {
    pub fn new(
        jobs: Arc<dyn SyncJobStore>,
        users: Arc<dyn UserStore>,
        queue: Arc<dyn TaskQueue>,
        engine: SyncEngine,
    ) -> Self {
        Self {
            jobs,
            users,
            queue,
            engine,
        }
    }

    /// Record a new sync job for a user and queue it.
    pub async fn create_sync_job(&self, user_id: u64, params: SyncJobParams) -> Result<SyncJob> {
        params.validate()?;

        if self.users.find_by_id(user_id).await?.is_none() {
            return Err(AppError::NotFound(format!("User {}", user_id)));
        }

        let job = SyncJob::new(user_id, params, Utc::now());
        self.jobs.create(&job).await?;

        let task = SyncUserTask {
            sync_job_id: job.id.clone(),
            user_id,
            params: job.params.clone(),
        };
        let payload = serde_json::to_value(&task)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JSON error: {}", e)))?;

        if let Err(e) = self.queue.enqueue(SYNC_USER_TASK, payload).await {
            tracing::error!(
                sync_job_id = %job.id,
                user_id,
                error = %e,
                "Failed to queue sync job, job left orphaned in created"
            );
            return Err(e);
        }

        tracing::info!(sync_job_id = %job.id, user_id, "Sync job queued");
        Ok(job)
    }

    pub async fn get_sync_job(&self, job_id: &str) -> Result<SyncJob> {
        self.jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Sync job {}", job_id)))
    }

    /// A user's jobs, newest first.
    pub async fn get_sync_jobs_by_user(&self, user_id: u64) -> Result<Vec<SyncJob>> {
        self.jobs.find_by_user_id(user_id).await
    }

    /// Handle one delivery of a sync task.
    ///
    /// Safe to call repeatedly for the same task: a finished job is left
    /// alone, and a job stuck in `started` (worker crashed mid-run) is run
    /// again from the top. An `Err` means the outcome was not recorded and
    /// the task should be delivered again.
    pub async fn process_task(&self, task: &SyncUserTask) -> Result<TaskOutcome> {
        let job = self.get_sync_job(&task.sync_job_id).await?;

        if job.user_id != task.user_id {
            tracing::warn!(
                sync_job_id = %job.id,
                task_user_id = task.user_id,
                job_user_id = job.user_id,
                "Task user does not match job, using job record"
            );
        }

        match job.status {
            status if status.is_terminal() => {
                tracing::info!(
                    sync_job_id = %job.id,
                    %status,
                    "Sync job already finished, skipping"
                );
                return Ok(TaskOutcome::AlreadyFinished(status));
            }
            SyncJobStatus::Created => {
                self.transition(&job.id, SyncJobUpdate::started(Utc::now()))
                    .await?;
            }
            _ => {
                tracing::info!(
                    sync_job_id = %job.id,
                    started_at = ?job.started_at,
                    "Sync job redelivered while started, running again"
                );
            }
        }

        let outcome = match self.engine.sync_user(job.user_id, &job.params).await {
            Ok(result) => TaskOutcome::Completed(result),
            Err(e) => {
                tracing::warn!(
                    sync_job_id = %job.id,
                    user_id = job.user_id,
                    error = %e,
                    kind = e.kind(),
                    "Sync run failed"
                );
                TaskOutcome::Failed(SyncJobError::from(&e))
            }
        };

        self.dispatch(&job.id, &outcome).await?;
        Ok(outcome)
    }

    /// Record the outcome on the job. Awaited before the delivery is acked.
    async fn dispatch(&self, job_id: &str, outcome: &TaskOutcome) -> Result<()> {
        match outcome {
            TaskOutcome::Completed(result) => self.on_completed(job_id, result.clone()).await,
            TaskOutcome::Failed(error) => self.on_failed(job_id, error.clone()).await,
            TaskOutcome::AlreadyFinished(_) => Ok(()),
        }
    }

    async fn on_completed(&self, job_id: &str, result: SyncResult) -> Result<()> {
        tracing::info!(
            sync_job_id = %job_id,
            inserted = result.inserted_count,
            details_updated = result.detail_updated_count,
            "Sync job completed"
        );
        self.transition(job_id, SyncJobUpdate::completed(result, Utc::now()))
            .await
    }

    async fn on_failed(&self, job_id: &str, error: SyncJobError) -> Result<()> {
        tracing::info!(sync_job_id = %job_id, kind = %error.kind, "Sync job failed");
        self.transition(job_id, SyncJobUpdate::failed(error, Utc::now()))
            .await
    }

    /// Apply a status change. Losing a race with a concurrent delivery of
    /// the same task (the transition is no longer allowed) is not an error.
    async fn transition(&self, job_id: &str, update: SyncJobUpdate) -> Result<()> {
        match self.jobs.update_by_id(job_id, update).await {
            Ok(_) => Ok(()),
            Err(AppError::BadRequest(msg)) => {
                tracing::warn!(sync_job_id = %job_id, %msg, "Skipping stale job transition");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
