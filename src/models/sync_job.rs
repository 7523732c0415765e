// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Sync job records: one requested run of the sync engine for a user.
//!
//! Status only ever moves forward:
//!
//! ```text
//! created --> started --> completed
//!                    \--> failed
//! ```

use crate::error::AppError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Jobs sitting in `created`/`started` longer than this are reported as stuck.
pub const STUCK_JOB_TIMEOUT_MINUTES: i64 = 15;

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobStatus {
    Created,
    Started,
    Completed,
    Failed,
}

impl SyncJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncJobStatus::Completed | SyncJobStatus::Failed)
    }

    /// Allowed single-step transitions.
    pub fn can_transition_to(self, next: SyncJobStatus) -> bool {
        matches!(
            (self, next),
            (SyncJobStatus::Created, SyncJobStatus::Started)
                | (SyncJobStatus::Started, SyncJobStatus::Completed)
                | (SyncJobStatus::Started, SyncJobStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncJobStatus::Created => "created",
            SyncJobStatus::Started => "started",
            SyncJobStatus::Completed => "completed",
            SyncJobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SyncJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional parameters for a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SyncJobParams {
    /// Re-fetch details of already-detailed activities that started within
    /// this many days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 3650))]
    pub refresh_last_days: Option<u32>,
}

/// Counters reported by a completed sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub pages_count: u32,
    pub per_page_count: u32,
    /// Summaries returned by upstream across all pages
    pub processed_count: u32,
    /// Summaries that were already stored locally
    pub existing_count: u32,
    /// Summaries not yet stored locally
    pub non_existing_count: u32,
    pub inserted_count: u32,
    /// Existing activities still missing their detail payload
    pub no_details_count: u32,
    /// Detailed activities re-fetched because of the refresh window
    pub refresh_details_count: u32,
    pub detail_processed_count: u32,
    pub detail_updated_count: u32,
}

/// Error captured on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJobError {
    pub message: String,
    /// Error category, see [`AppError::kind`]
    pub kind: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl From<&AppError> for SyncJobError {
    fn from(err: &AppError) -> Self {
        Self {
            message: err.to_string(),
            kind: err.kind().to_string(),
            retryable: err.is_retryable(),
            stack: Some(format!("{:?}", err)),
        }
    }
}

/// Persisted sync job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    /// UUID (also used as document ID)
    pub id: String,
    pub user_id: u64,
    #[serde(default)]
    pub params: SyncJobParams,
    pub status: SyncJobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_result: Option<SyncResult>,
    #[serde(default)]
    pub failed_error: Option<SyncJobError>,
}

impl SyncJob {
    /// A freshly requested job.
    pub fn new(user_id: u64, params: SyncJobParams, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            params,
            status: SyncJobStatus::Created,
            created_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            completed_result: None,
            failed_error: None,
        }
    }

    /// Whether the job has been waiting on a worker for too long.
    ///
    /// Catches jobs orphaned by a failed enqueue and runs lost to a crash.
    pub fn is_stuck(&self, now: DateTime<Utc>) -> bool {
        let since = match self.status {
            SyncJobStatus::Created => self.created_at,
            SyncJobStatus::Started => self.started_at.unwrap_or(self.created_at),
            SyncJobStatus::Completed | SyncJobStatus::Failed => return false,
        };
        now - since > Duration::minutes(STUCK_JOB_TIMEOUT_MINUTES)
    }
}

/// Partial update of a job record, built through the transition helpers.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncJobUpdate {
    pub status: SyncJobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub completed_result: Option<SyncResult>,
    pub failed_error: Option<SyncJobError>,
}

impl SyncJobUpdate {
    fn status(status: SyncJobStatus) -> Self {
        Self {
            status,
            started_at: None,
            completed_at: None,
            failed_at: None,
            completed_result: None,
            failed_error: None,
        }
    }

    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(now),
            ..Self::status(SyncJobStatus::Started)
        }
    }

    pub fn completed(result: SyncResult, now: DateTime<Utc>) -> Self {
        Self {
            completed_at: Some(now),
            completed_result: Some(result),
            ..Self::status(SyncJobStatus::Completed)
        }
    }

    pub fn failed(error: SyncJobError, now: DateTime<Utc>) -> Self {
        Self {
            failed_at: Some(now),
            failed_error: Some(error),
            ..Self::status(SyncJobStatus::Failed)
        }
    }

    /// Apply to a stored job, refusing anything but a forward transition.
    pub fn apply(self, job: &mut SyncJob) -> Result<(), AppError> {
        if !job.status.can_transition_to(self.status) {
            return Err(AppError::BadRequest(format!(
                "Sync job {} cannot move from {} to {}",
                job.id, job.status, self.status
            )));
        }

        job.status = self.status;
        if self.started_at.is_some() {
            job.started_at = self.started_at;
        }
        if self.completed_at.is_some() {
            job.completed_at = self.completed_at;
            job.completed_result = self.completed_result;
        }
        if self.failed_at.is_some() {
            job.failed_at = self.failed_at;
            job.failed_error = self.failed_error;
        }
        Ok(())
    }
}
