// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod activity;
pub mod sync_job;
pub mod user;

pub use activity::{Activity, ActivityQuery, ActivityUpdate};
pub use sync_job::{
    SyncJob, SyncJobError, SyncJobParams, SyncJobStatus, SyncJobUpdate, SyncResult,
};
pub use user::{StravaToken, User, UserTokens};
