// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! The sync core talks to storage through the traits below. `FirestoreDb`
//! is the production backend; `MemoryDb` keeps everything in-process for
//! local development and tests.

pub mod firestore;
pub mod memory;

pub use firestore::{FirestoreDb, FirestoreUserStore};
pub use memory::MemoryDb;

use crate::error::Result;
use crate::models::{
    Activity, ActivityQuery, ActivityUpdate, StravaToken, SyncJob, SyncJobUpdate, User,
};
use async_trait::async_trait;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    pub const TOKENS: &str = "tokens";
    pub const ACTIVITIES: &str = "activities";
    pub const SYNC_JOBS: &str = "sync_jobs";
}

/// Users and their (decrypted) Strava credentials.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, user_id: u64) -> Result<Option<User>>;

    /// Stored credential pair, decrypted.
    async fn find_token(&self, user_id: u64) -> Result<Option<StravaToken>>;

    /// Replace the stored credential pair (encrypting it at rest).
    async fn update_token(&self, user_id: u64, token: &StravaToken) -> Result<()>;
}

/// Mirrored activities, addressed by (user, Strava activity ID).
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Batch lookup. IDs with no stored activity are simply absent from the result.
    async fn find_by_external_ids(&self, user_id: u64, strava_ids: &[u64])
        -> Result<Vec<Activity>>;

    /// Insert new records, skipping any (user, Strava ID) pair that already
    /// exists. Returns the number actually inserted.
    async fn insert_many(&self, activities: Vec<Activity>) -> Result<u32>;

    /// Apply a partial update. Returns `false` if no such activity exists.
    async fn update_by_external_id(
        &self,
        user_id: u64,
        strava_id: u64,
        update: ActivityUpdate,
    ) -> Result<bool>;

    /// A user's activities, newest first.
    async fn list_for_user(&self, user_id: u64, query: &ActivityQuery) -> Result<Vec<Activity>>;
}

/// Persisted sync job records.
#[async_trait]
pub trait SyncJobStore: Send + Sync {
    async fn create(&self, job: &SyncJob) -> Result<()>;

    /// Apply a status transition and return the updated record.
    ///
    /// Fails with `NotFound` for unknown IDs and `BadRequest` for a
    /// transition the current status does not allow.
    async fn update_by_id(&self, id: &str, update: SyncJobUpdate) -> Result<SyncJob>;

    async fn find_by_id(&self, id: &str) -> Result<Option<SyncJob>>;

    /// A user's jobs, newest first.
    async fn find_by_user_id(&self, user_id: u64) -> Result<Vec<SyncJob>>;
}
