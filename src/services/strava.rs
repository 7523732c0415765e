// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client.
//!
//! Handles:
//! - Paginated activity summaries
//! - Per-activity detail fetches
//! - OAuth token refresh
//! - Mapping HTTP failures onto the error taxonomy (429 → rate limit, etc.)

use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://www.strava.com/api/v3";
const DEFAULT_OAUTH_BASE: &str = "https://www.strava.com/oauth";

/// The subset of the Strava API the sync core depends on.
#[async_trait]
pub trait StravaApi: Send + Sync {
    /// One page of the authenticated athlete's activities (summaries).
    async fn list_activity_summaries(
        &self,
        access_token: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<StravaActivity>>;

    /// Full detail payload for one activity.
    async fn get_activity_detail(
        &self,
        access_token: &str,
        activity_id: u64,
    ) -> Result<StravaActivity>;

    /// Exchange a refresh token for a new access/refresh pair.
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenRefreshResponse>;
}

/// An activity as returned by Strava (summary or detail).
///
/// Only the fields the sync engine needs are parsed out; the complete
/// object is kept in `raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct StravaActivity {
    pub id: u64,
    pub start_date: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

impl TryFrom<serde_json::Value> for StravaActivity {
    type Error = AppError;

    fn try_from(raw: serde_json::Value) -> Result<Self> {
        let id = raw
            .get("id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| AppError::UpstreamData("Activity payload without numeric id".into()))?;

        let start_date = match raw.get("start_date").and_then(|v| v.as_str()) {
            Some(s) => Some(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|e| {
                        AppError::UpstreamData(format!(
                            "Invalid start_date for activity {}: {}",
                            id, e
                        ))
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Self {
            id,
            start_date,
            raw,
        })
    }
}

/// Token refresh response from Strava.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp
    pub expires_at: i64,
}

/// Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    base_url: String,
    oauth_url: String,
    client_id: String,
    client_secret: String,
}

impl StravaClient {
    /// Create a new Strava client with OAuth credentials.
    ///
    /// `timeout` bounds every request end to end.
    pub fn new(client_id: String, client_secret: String, timeout: Duration) -> Result<Self> {
        Self::with_base_urls(
            client_id,
            client_secret,
            timeout,
            DEFAULT_API_BASE,
            DEFAULT_OAUTH_BASE,
        )
    }

    /// Same as `new`, against a different host (tests, proxies).
    pub fn with_base_urls(
        client_id: String,
        client_secret: String,
        timeout: Duration,
        base_url: &str,
        oauth_url: &str,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            oauth_url: oauth_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
        })
    }

    /// Generic GET request with JSON response.
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(send_error)?;

        check_response_json(response).await
    }
}

#[async_trait]
impl StravaApi for StravaClient {
    async fn list_activity_summaries(
        &self,
        access_token: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<StravaActivity>> {
        let url = format!("{}/athlete/activities", self.base_url);
        let raw: Vec<serde_json::Value> = self
            .get_json(
                &url,
                access_token,
                &[("page", page.to_string()), ("per_page", per_page.to_string())],
            )
            .await?;

        raw.into_iter().map(StravaActivity::try_from).collect()
    }

    async fn get_activity_detail(
        &self,
        access_token: &str,
        activity_id: u64,
    ) -> Result<StravaActivity> {
        let url = format!("{}/activities/{}", self.base_url, activity_id);
        let raw: serde_json::Value = self.get_json(&url, access_token, &[]).await?;
        StravaActivity::try_from(raw)
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenRefreshResponse> {
        let response = self
            .http
            .post(format!("{}/token", self.oauth_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(send_error)?;

        check_response_json(response).await
    }
}

/// Map a failed send (connect error, timeout, ...) to a retryable error.
fn send_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::UpstreamTransient(format!("Request timed out: {}", e))
    } else {
        AppError::UpstreamTransient(e.to_string())
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
fn status_error(status: StatusCode, body: &str) -> AppError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            tracing::warn!("Strava rate limit hit (429)");
            AppError::UpstreamRateLimit
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AppError::UpstreamAuth(format!("HTTP {}: {}", status, body))
        }
        StatusCode::NOT_FOUND => AppError::NotFound(format!("Strava resource: {}", body)),
        s if s.is_server_error() => AppError::UpstreamTransient(format!("HTTP {}: {}", s, body)),
        s => AppError::UpstreamData(format!("HTTP {}: {}", s, body)),
    }
}

/// Check response status and parse JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }

    let bytes = response.bytes().await.map_err(send_error)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::UpstreamData(format!("JSON parse error: {}", e)))
}
