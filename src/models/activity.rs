// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Mirrored Strava activity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored activity record.
///
/// Created summary-only the first time it shows up on a listing page, then
/// filled in with the detail payload. The sync path never deletes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Internal ID (also used as document ID), see [`Activity::document_id`]
    pub id: String,
    /// Owning user (Strava athlete ID)
    pub user_id: u64,
    /// Strava activity ID
    pub strava_id: u64,
    /// Whether `data` holds the full detail payload rather than a summary
    pub has_details: bool,
    /// Upstream start time, copied out of `data` for filtering
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// Raw upstream payload
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Activity {
    /// Document ID for a (user, Strava activity) pair.
    ///
    /// Deterministic, so a second insert of the same pair lands on the
    /// same document.
    pub fn document_id(user_id: u64, strava_id: u64) -> String {
        format!("{}_{}", user_id, strava_id)
    }

    /// A summary-only record as first seen on a listing page.
    pub fn new_summary(
        user_id: u64,
        strava_id: u64,
        start_date: Option<DateTime<Utc>>,
        data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Self::document_id(user_id, strava_id),
            user_id,
            strava_id,
            has_details: false,
            start_date,
            data,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied by external ID. `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct ActivityUpdate {
    pub has_details: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub data: Option<serde_json::Value>,
}

impl ActivityUpdate {
    /// Apply to a stored record, bumping `updated_at`.
    pub fn apply(self, activity: &mut Activity, now: DateTime<Utc>) {
        if let Some(has_details) = self.has_details {
            activity.has_details = has_details;
        }
        if let Some(start_date) = self.start_date {
            activity.start_date = Some(start_date);
        }
        if let Some(data) = self.data {
            activity.data = data;
        }
        activity.updated_at = now;
    }
}

/// Filters for listing a user's activities (newest first).
#[derive(Debug, Clone)]
pub struct ActivityQuery {
    pub has_details: Option<bool>,
    /// Only activities that started strictly after this time
    pub after: Option<DateTime<Utc>>,
    /// Only activities that started strictly before this time
    pub before: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ActivityQuery {
    fn default() -> Self {
        Self {
            has_details: None,
            after: None,
            before: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl ActivityQuery {
    /// Whether an activity passes the filters (ignores paging).
    pub fn matches(&self, activity: &Activity) -> bool {
        if let Some(has_details) = self.has_details {
            if activity.has_details != has_details {
                return false;
            }
        }
        if let Some(after) = self.after {
            if !activity.start_date.is_some_and(|d| d > after) {
                return false;
            }
        }
        if let Some(before) = self.before {
            if !activity.start_date.is_some_and(|d| d < before) {
                return false;
            }
        }
        true
    }
}
