// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity sync engine.
//!
//! Handles one sync run for a user:
//! 1. Page through the user's activity summaries (newest first)
//! 2. Look up which of the page's activities are already stored
//! 3. Insert the new ones as summary-only records
//! 4. Fetch details for summary-only, newly inserted, and (optionally)
//!    recently started activities
//! 5. Stop at the first short page
//!
//! Everything runs strictly sequentially: one upstream call in flight at a
//! time keeps a single run well inside Strava's rate limits. A failure aborts
//! the run; whatever was written before it stays written, and the next run
//! picks up from there.

use crate::db::ActivityStore;
use crate::error::{AppError, Result};
use crate::models::{Activity, ActivityUpdate, SyncJobParams, SyncResult};
use crate::services::strava::{StravaActivity, StravaApi};
use crate::services::token::TokenProvider;
use crate::time_utils::window_start;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Summaries requested per page. A shorter page is the last one.
pub const PER_PAGE: u32 = 100;

/// Drives a sync run against Strava and the activity store.
#[derive(Clone)]
pub struct SyncEngine {
    api: Arc<dyn StravaApi>,
    tokens: TokenProvider,
    activities: Arc<dyn ActivityStore>,
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn StravaApi>,
        tokens: TokenProvider,
        activities: Arc<dyn ActivityStore>,
    ) -> Self {
        Self {
            api,
            tokens,
            activities,
        }
    }

    /// Mirror all of a user's activities, returning what was done.
    pub async fn sync_user(&self, user_id: u64, params: &SyncJobParams) -> Result<SyncResult> {
        let mut result = SyncResult {
            per_page_count: PER_PAGE,
            ..Default::default()
        };

        tracing::info!(
            user_id,
            refresh_last_days = ?params.refresh_last_days,
            "Starting activity sync"
        );

        let mut page = 1;
        loop {
            let token = self.tokens.get_access_token(user_id).await?;
            let summaries = self
                .api
                .list_activity_summaries(&token, page, PER_PAGE)
                .await
                .map_err(|e| self.forget_rejected_token(user_id, e))?;
            let fetched = summaries.len();

            result.pages_count += 1;
            result.processed_count += fetched as u32;

            self.sync_page(user_id, params, summaries, &mut result).await?;

            tracing::debug!(user_id, page, fetched, "Synced page");

            if fetched < PER_PAGE as usize {
                break;
            }
            page += 1;
        }

        tracing::info!(
            user_id,
            pages = result.pages_count,
            processed = result.processed_count,
            inserted = result.inserted_count,
            details_updated = result.detail_updated_count,
            "Activity sync finished"
        );

        Ok(result)
    }

    /// Stop handing out a cached token Strava refused, so the next run
    /// reloads whatever the user store holds now.
    fn forget_rejected_token(&self, user_id: u64, err: AppError) -> AppError {
        if matches!(err, AppError::UpstreamAuth(_)) {
            tracing::warn!(
                user_id,
                error = %err,
                "Strava rejected access token, dropping cached copy"
            );
            self.tokens.invalidate(user_id);
        }
        err
    }

    async fn sync_page(
        &self,
        user_id: u64,
        params: &SyncJobParams,
        mut summaries: Vec<StravaActivity>,
        result: &mut SyncResult,
    ) -> Result<()> {
        // Pages can shift while we read them, so one activity may appear twice.
        let mut seen = HashSet::new();
        summaries.retain(|s| seen.insert(s.id));

        if summaries.is_empty() {
            return Ok(());
        }

        let ids: Vec<u64> = summaries.iter().map(|s| s.id).collect();
        let existing: HashMap<u64, bool> = self
            .activities
            .find_by_external_ids(user_id, &ids)
            .await?
            .into_iter()
            .map(|a| (a.strava_id, a.has_details))
            .collect();

        let now = Utc::now();
        let refresh_after = params.refresh_last_days.map(|days| window_start(now, days));

        let mut missing_details = Vec::new();
        let mut refresh = Vec::new();
        let mut new_ids = Vec::new();
        let mut new_records = Vec::new();

        for summary in summaries {
            match existing.get(&summary.id) {
                Some(false) => missing_details.push(summary.id),
                Some(true) => {
                    let in_window = match (refresh_after, summary.start_date) {
                        (Some(after), Some(start)) => start >= after,
                        _ => false,
                    };
                    if in_window {
                        refresh.push(summary.id);
                    }
                }
                None => {
                    new_ids.push(summary.id);
                    new_records.push(Activity::new_summary(
                        user_id,
                        summary.id,
                        summary.start_date,
                        summary.raw,
                        now,
                    ));
                }
            }
        }

        result.existing_count += existing.len() as u32;
        result.non_existing_count += new_records.len() as u32;
        result.no_details_count += missing_details.len() as u32;
        result.refresh_details_count += refresh.len() as u32;

        if !new_records.is_empty() {
            result.inserted_count += self.activities.insert_many(new_records).await?;
        }

        // Summary-only records left over from earlier runs go first.
        for strava_id in missing_details.into_iter().chain(new_ids).chain(refresh) {
            self.sync_details(user_id, strava_id, result).await?;
        }

        Ok(())
    }

    async fn sync_details(
        &self,
        user_id: u64,
        strava_id: u64,
        result: &mut SyncResult,
    ) -> Result<()> {
        let token = self.tokens.get_access_token(user_id).await?;
        let detail = self
            .api
            .get_activity_detail(&token, strava_id)
            .await
            .map_err(|e| self.forget_rejected_token(user_id, e))?;
        result.detail_processed_count += 1;

        let update = ActivityUpdate {
            has_details: Some(true),
            start_date: detail.start_date,
            data: Some(detail.raw),
        };

        if self
            .activities
            .update_by_external_id(user_id, strava_id, update)
            .await?
        {
            result.detail_updated_count += 1;
        } else {
            tracing::warn!(user_id, strava_id, "Activity vanished before detail update");
        }
        Ok(())
    }
}
