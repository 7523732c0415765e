// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process storage backend.
//!
//! Implements every store trait on top of `DashMap`s. Nothing survives a
//! restart; intended for local development (`STORAGE_BACKEND=memory`) and
//! tests.

use crate::db::{ActivityStore, SyncJobStore, UserStore};
use crate::error::{AppError, Result};
use crate::models::{
    Activity, ActivityQuery, ActivityUpdate, StravaToken, SyncJob, SyncJobUpdate, User,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// In-memory database. Cloning shares the underlying maps.
#[derive(Clone, Default)]
pub struct MemoryDb {
    users: Arc<DashMap<u64, User>>,
    tokens: Arc<DashMap<u64, StravaToken>>,
    /// Keyed by `Activity::document_id`
    activities: Arc<DashMap<String, Activity>>,
    jobs: Arc<DashMap<String, SyncJob>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a user profile and optionally their credentials.
    pub fn insert_user(&self, user: User, token: Option<StravaToken>) {
        if let Some(token) = token {
            self.tokens.insert(user.id, token);
        }
        self.users.insert(user.id, user);
    }

    /// Number of stored activities across all users.
    pub fn activity_count(&self) -> usize {
        self.activities.len()
    }
}

#[async_trait]
impl UserStore for MemoryDb {
    async fn find_by_id(&self, user_id: u64) -> Result<Option<User>> {
        Ok(self.users.get(&user_id).map(|u| u.clone()))
    }

    async fn find_token(&self, user_id: u64) -> Result<Option<StravaToken>> {
        Ok(self.tokens.get(&user_id).map(|t| t.clone()))
    }

    async fn update_token(&self, user_id: u64, token: &StravaToken) -> Result<()> {
        if !self.users.contains_key(&user_id) {
            return Err(AppError::NotFound(format!("User {}", user_id)));
        }
        self.tokens.insert(user_id, token.clone());
        Ok(())
    }
}

#[async_trait]
impl ActivityStore for MemoryDb {
    async fn find_by_external_ids(
        &self,
        user_id: u64,
        strava_ids: &[u64],
    ) -> Result<Vec<Activity>> {
        Ok(strava_ids
            .iter()
            .filter_map(|id| {
                self.activities
                    .get(&Activity::document_id(user_id, *id))
                    .map(|a| a.clone())
            })
            .collect())
    }

    async fn insert_many(&self, activities: Vec<Activity>) -> Result<u32> {
        let mut inserted = 0;
        for activity in activities {
            if let Entry::Vacant(slot) = self.activities.entry(activity.id.clone()) {
                slot.insert(activity);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn update_by_external_id(
        &self,
        user_id: u64,
        strava_id: u64,
        update: ActivityUpdate,
    ) -> Result<bool> {
        match self
            .activities
            .get_mut(&Activity::document_id(user_id, strava_id))
        {
            Some(mut activity) => {
                update.apply(&mut activity, chrono::Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_for_user(&self, user_id: u64, query: &ActivityQuery) -> Result<Vec<Activity>> {
        let mut matching: Vec<Activity> = self
            .activities
            .iter()
            .filter(|a| a.user_id == user_id && query.matches(a))
            .map(|a| a.clone())
            .collect();

        // Newest first; undated activities last.
        matching.sort_by(|a, b| {
            b.start_date
                .cmp(&a.start_date)
                .then(b.strava_id.cmp(&a.strava_id))
        });

        Ok(matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }
}

#[async_trait]
impl SyncJobStore for MemoryDb {
    async fn create(&self, job: &SyncJob) -> Result<()> {
        match self.jobs.entry(job.id.clone()) {
            Entry::Occupied(_) => Err(AppError::Persistence(format!(
                "Sync job {} already exists",
                job.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
                Ok(())
            }
        }
    }

    async fn update_by_id(&self, id: &str, update: SyncJobUpdate) -> Result<SyncJob> {
        let mut job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Sync job {}", id)))?;
        update.apply(&mut job)?;
        Ok(job.clone())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SyncJob>> {
        Ok(self.jobs.get(id).map(|j| j.clone()))
    }

    async fn find_by_user_id(&self, user_id: u64) -> Result<Vec<SyncJob>> {
        let mut jobs: Vec<SyncJob> = self
            .jobs
            .iter()
            .filter(|j| j.user_id == user_id)
            .map(|j| j.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }
}
