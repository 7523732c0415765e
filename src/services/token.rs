// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access token lifecycle.
//!
//! `TokenProvider` hands out a valid Strava access token for a user:
//! - In-memory cache of decrypted access tokens, checked against expiry on
//!   every read
//! - Per-user locking so concurrent callers trigger a single refresh
//! - Refresh through Strava when the stored token has expired, persisting
//!   the rotated pair back to the user store
//! - Exponential backoff after failed refreshes, so a rejected refresh token
//!   is not hammered

use crate::db::UserStore;
use crate::error::{AppError, Result};
use crate::models::StravaToken;
use crate::services::strava::StravaApi;
use crate::time_utils::from_unix_secs;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Margin before token expiration when we proactively refresh (5 minutes).
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

const REFRESH_BACKOFF_BASE_SECS: i64 = 30;
const REFRESH_BACKOFF_MAX_SECS: i64 = 15 * 60;

/// Cached access token with expiry information.
#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Per-process cache of access tokens, keyed by user ID.
///
/// Shared by reference between every `TokenProvider` in the process. Entries
/// are never trusted without checking their expiry.
#[derive(Default)]
pub struct TokenCache {
    entries: DashMap<u64, CachedToken>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached token if it stays valid for at least `margin` past `now`.
    pub fn get_valid(&self, user_id: u64, now: DateTime<Utc>, margin: Duration) -> Option<String> {
        self.entries
            .get(&user_id)
            .filter(|cached| now + margin < cached.expires_at)
            .map(|cached| cached.access_token.clone())
    }

    pub fn contains(&self, user_id: u64) -> bool {
        self.entries.contains_key(&user_id)
    }

    pub fn invalidate(&self, user_id: u64) {
        self.entries.remove(&user_id);
    }

    fn insert(&self, user_id: u64, access_token: String, expires_at: DateTime<Utc>) {
        self.entries.insert(
            user_id,
            CachedToken {
                access_token,
                expires_at,
            },
        );
    }
}

/// Shared per-user refresh locks.
pub type RefreshLocks = Arc<DashMap<u64, Arc<Mutex<()>>>>;

#[derive(Debug, Clone, Copy)]
struct RefreshFailure {
    attempts: u32,
    retry_after: DateTime<Utc>,
}

/// Delay before the next refresh attempt after `attempts` consecutive failures.
fn refresh_backoff(attempts: u32) -> Duration {
    let shift = attempts.saturating_sub(1).min(16);
    let secs = REFRESH_BACKOFF_BASE_SECS
        .saturating_mul(1i64 << shift)
        .min(REFRESH_BACKOFF_MAX_SECS);
    Duration::seconds(secs)
}

/// Obtains valid Strava access tokens for users.
#[derive(Clone)]
pub struct TokenProvider {
    api: Arc<dyn StravaApi>,
    users: Arc<dyn UserStore>,
    cache: Arc<TokenCache>,
    refresh_locks: RefreshLocks,
    refresh_failures: Arc<DashMap<u64, RefreshFailure>>,
}

impl TokenProvider {
    /// The `cache` should be shared across the whole process so that
    /// every worker benefits from a refresh.
    pub fn new(api: Arc<dyn StravaApi>, users: Arc<dyn UserStore>, cache: Arc<TokenCache>) -> Self {
        Self {
            api,
            users,
            cache,
            refresh_locks: Arc::new(DashMap::new()),
            refresh_failures: Arc::new(DashMap::new()),
        }
    }

    /// Get a valid (non-expired) access token for the given user.
    ///
    /// 1. Check in-memory cache (no I/O)
    /// 2. Acquire per-user lock, re-check cache
    /// 3. Load stored credentials; use the stored access token if still valid
    /// 4. Otherwise refresh with Strava, persist the new pair, cache it
    pub async fn get_access_token(&self, user_id: u64) -> Result<String> {
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);

        if let Some(token) = self.cache.get_valid(user_id, Utc::now(), margin) {
            return Ok(token);
        }

        let lock = self
            .refresh_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another task may have refreshed while we were waiting.
        if let Some(token) = self.cache.get_valid(user_id, Utc::now(), margin) {
            return Ok(token);
        }

        let stored = self
            .users
            .find_token(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Strava tokens for user {}", user_id)))?;

        let now = Utc::now();
        if now + margin < stored.expires_at {
            // Still valid, possibly refreshed by another process.
            self.cache
                .insert(user_id, stored.access_token.clone(), stored.expires_at);
            return Ok(stored.access_token);
        }

        self.check_backoff(user_id, now)?;

        tracing::info!(user_id, "Access token expired, refreshing");

        let refreshed = match self.api.refresh_access_token(&stored.refresh_token).await {
            Ok(t) => t,
            Err(e) => return self.recover_failed_refresh(user_id, &stored, e).await,
        };
        self.refresh_failures.remove(&user_id);

        let expires_at = from_unix_secs(refreshed.expires_at).ok_or_else(|| {
            AppError::UpstreamData(format!(
                "Invalid token expiry {} for user {}",
                refreshed.expires_at, user_id
            ))
        })?;

        let token = StravaToken {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token,
            expires_at,
        };
        self.users.update_token(user_id, &token).await?;

        self.cache
            .insert(user_id, token.access_token.clone(), token.expires_at);

        tracing::info!(user_id, expires_at = %expires_at, "Token refreshed and cached");
        Ok(token.access_token)
    }

    /// Drop a user's cached token (e.g. after Strava rejected it).
    pub fn invalidate(&self, user_id: u64) {
        self.cache.invalidate(user_id);
    }

    fn check_backoff(&self, user_id: u64, now: DateTime<Utc>) -> Result<()> {
        if let Some(failure) = self.refresh_failures.get(&user_id) {
            if now < failure.retry_after {
                return Err(AppError::UpstreamAuth(format!(
                    "Token refresh for user {} backing off after {} failures until {}",
                    user_id, failure.attempts, failure.retry_after
                )));
            }
        }
        Ok(())
    }

    /// The refresh call failed. If another process already rotated the
    /// credentials (our refresh token is stale), use theirs; otherwise
    /// record the failure and report it.
    async fn recover_failed_refresh(
        &self,
        user_id: u64,
        stale: &StravaToken,
        err: AppError,
    ) -> Result<String> {
        if let Some(current) = self.users.find_token(user_id).await? {
            let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
            if current.refresh_token != stale.refresh_token
                && Utc::now() + margin < current.expires_at
            {
                tracing::info!(
                    user_id,
                    "Refresh token race detected - another instance won, using their tokens"
                );
                self.cache
                    .insert(user_id, current.access_token.clone(), current.expires_at);
                return Ok(current.access_token);
            }
        }

        let now = Utc::now();
        let failure = *self
            .refresh_failures
            .entry(user_id)
            .and_modify(|f| {
                f.attempts += 1;
                f.retry_after = now + refresh_backoff(f.attempts);
            })
            .or_insert(RefreshFailure {
                attempts: 1,
                retry_after: now + refresh_backoff(1),
            });

        tracing::warn!(
            user_id,
            error = %err,
            attempts = failure.attempts,
            retry_after = %failure.retry_after,
            "Token refresh failed"
        );

        Err(AppError::UpstreamAuth(format!("Token refresh failed: {}", err)))
    }
}
