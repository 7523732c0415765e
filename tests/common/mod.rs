// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use strava_sync::config::Config;
use strava_sync::db::{FirestoreDb, MemoryDb, SyncJobStore};
use strava_sync::error::{AppError, Result};
use strava_sync::models::{StravaToken, SyncJob, SyncJobUpdate, User};
use strava_sync::routes::create_router;
use strava_sync::services::{
    JobOrchestrator, StravaActivity, StravaApi, SyncEngine, SyncUserTask, TaskQueue, TokenCache,
    TokenProvider, TokenRefreshResponse,
};
use strava_sync::AppState;

pub const USER_ID: u64 = 1001;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Generate a unique ID for test isolation.
#[allow(dead_code)]
pub fn unique_id() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64
        % 1_000_000_000_000
}

#[allow(dead_code)]
pub fn test_user(id: u64) -> User {
    User {
        id,
        firstname: "Test".to_string(),
        lastname: "User".to_string(),
        created_at: Utc::now(),
    }
}

#[allow(dead_code)]
pub fn valid_token() -> StravaToken {
    StravaToken {
        access_token: "access-0".to_string(),
        refresh_token: "refresh-0".to_string(),
        expires_at: Utc::now() + Duration::hours(6),
    }
}

/// Activity summary as Strava lists it, started `days_ago` days before now.
#[allow(dead_code)]
pub fn summary(id: u64, days_ago: i64) -> Value {
    json!({
        "id": id,
        "name": format!("Activity {}", id),
        "sport_type": "Ride",
        "start_date": (Utc::now() - Duration::days(days_ago)).to_rfc3339(),
    })
}

// ─── Fake Strava ─────────────────────────────────────────────

/// In-memory Strava with call counters and failure injection.
///
/// Activities are listed in the order given (callers pass newest first).
/// Only the current access token is accepted.
pub struct FakeStrava {
    activities: Mutex<Vec<Value>>,
    access_token: Mutex<String>,
    pub list_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    detail_calls: Mutex<Vec<u64>>,
    fail_details: Mutex<HashSet<u64>>,
    pub fail_refresh: AtomicBool,
    pub rate_limited: AtomicBool,
}

#[allow(dead_code)]
impl FakeStrava {
    pub fn new(activities: Vec<Value>) -> Self {
        Self {
            activities: Mutex::new(activities),
            access_token: Mutex::new("access-0".to_string()),
            list_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            detail_calls: Mutex::new(Vec::new()),
            fail_details: Mutex::new(HashSet::new()),
            fail_refresh: AtomicBool::new(false),
            rate_limited: AtomicBool::new(false),
        }
    }

    /// `count` activities with IDs `1..=count`, newest (highest ID) first,
    /// one per day.
    pub fn with_count(count: u64) -> Self {
        Self::new((1..=count).rev().map(|id| summary(id, (count - id) as i64)).collect())
    }

    pub fn set_activities(&self, activities: Vec<Value>) {
        *self.activities.lock().unwrap() = activities;
    }

    /// Make detail fetches for this activity fail with a transient error.
    pub fn fail_detail_for(&self, id: u64) {
        self.fail_details.lock().unwrap().insert(id);
    }

    pub fn clear_failures(&self) {
        self.fail_details.lock().unwrap().clear();
        self.fail_refresh.store(false, Ordering::SeqCst);
        self.rate_limited.store(false, Ordering::SeqCst);
    }

    pub fn detail_calls(&self) -> Vec<u64> {
        self.detail_calls.lock().unwrap().clone()
    }

    pub fn detail_call_count(&self) -> usize {
        self.detail_calls.lock().unwrap().len()
    }

    pub fn reset_counters(&self) {
        self.list_calls.store(0, Ordering::SeqCst);
        self.refresh_calls.store(0, Ordering::SeqCst);
        self.detail_calls.lock().unwrap().clear();
    }

    fn check_token(&self, token: &str) -> Result<()> {
        if *self.access_token.lock().unwrap() != token {
            return Err(AppError::UpstreamAuth(format!("unknown token {}", token)));
        }
        if self.rate_limited.load(Ordering::SeqCst) {
            return Err(AppError::UpstreamRateLimit);
        }
        Ok(())
    }
}

#[async_trait]
impl StravaApi for FakeStrava {
    async fn list_activity_summaries(
        &self,
        access_token: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<StravaActivity>> {
        self.check_token(access_token)?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let activities = self.activities.lock().unwrap().clone();
        activities
            .into_iter()
            .skip(((page - 1) * per_page) as usize)
            .take(per_page as usize)
            .map(StravaActivity::try_from)
            .collect()
    }

    async fn get_activity_detail(
        &self,
        access_token: &str,
        activity_id: u64,
    ) -> Result<StravaActivity> {
        self.check_token(access_token)?;
        self.detail_calls.lock().unwrap().push(activity_id);

        if self.fail_details.lock().unwrap().contains(&activity_id) {
            return Err(AppError::UpstreamTransient("connection reset".to_string()));
        }

        let mut detail = self
            .activities
            .lock()
            .unwrap()
            .iter()
            .find(|a| a["id"] == activity_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Strava activity {}", activity_id)))?;
        detail["description"] = json!("full detail");
        detail["fetch"] = json!(self.detail_call_count());

        StravaActivity::try_from(detail)
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenRefreshResponse> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(AppError::UpstreamAuth(format!(
                "invalid_grant for {}",
                refresh_token
            )));
        }

        let access_token = format!("access-{}", n);
        *self.access_token.lock().unwrap() = access_token.clone();

        Ok(TokenRefreshResponse {
            access_token,
            refresh_token: format!("refresh-{}", n),
            expires_at: (Utc::now() + Duration::hours(6)).timestamp(),
        })
    }
}

// ─── Queue and store doubles ─────────────────────────────────

/// Queue that records what was enqueued.
#[derive(Default)]
pub struct RecordingQueue {
    tasks: Mutex<Vec<(String, Value)>>,
    pub fail: AtomicBool,
}

#[allow(dead_code)]
impl RecordingQueue {
    pub fn sync_tasks(&self) -> Vec<SyncUserTask> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| serde_json::from_value(payload.clone()).unwrap())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, task_name: &str, payload: Value) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Internal(anyhow::anyhow!("queue unavailable")));
        }
        self.tasks
            .lock()
            .unwrap()
            .push((task_name.to_string(), payload));
        Ok(())
    }
}

/// Job store whose status writes can be made to fail.
pub struct FlakyJobStore {
    inner: MemoryDb,
    pub fail_updates: AtomicBool,
}

#[async_trait]
impl SyncJobStore for FlakyJobStore {
    async fn create(&self, job: &SyncJob) -> Result<()> {
        self.inner.create(job).await
    }

    async fn update_by_id(&self, id: &str, update: SyncJobUpdate) -> Result<SyncJob> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(AppError::Persistence("firestore unavailable".to_string()));
        }
        self.inner.update_by_id(id, update).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SyncJob>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_user_id(&self, user_id: u64) -> Result<Vec<SyncJob>> {
        self.inner.find_by_user_id(user_id).await
    }
}

// ─── Wiring ──────────────────────────────────────────────────

/// Full sync stack over in-memory stores and a fake Strava.
#[allow(dead_code)]
pub struct TestEnv {
    pub db: MemoryDb,
    pub strava: Arc<FakeStrava>,
    pub cache: Arc<TokenCache>,
    pub tokens: TokenProvider,
    pub engine: SyncEngine,
    pub queue: Arc<RecordingQueue>,
    pub jobs: Arc<FlakyJobStore>,
    pub orchestrator: Arc<JobOrchestrator>,
}

#[allow(dead_code)]
impl TestEnv {
    /// One user (`USER_ID`) with a valid token.
    pub fn new(strava: FakeStrava) -> Self {
        Self::with_token(strava, Some(valid_token()))
    }

    pub fn with_token(strava: FakeStrava, token: Option<StravaToken>) -> Self {
        let db = MemoryDb::new();
        db.insert_user(test_user(USER_ID), token);

        let strava = Arc::new(strava);
        let cache = Arc::new(TokenCache::new());
        let tokens = TokenProvider::new(strava.clone(), Arc::new(db.clone()), cache.clone());
        let engine = SyncEngine::new(strava.clone(), tokens.clone(), Arc::new(db.clone()));

        let queue = Arc::new(RecordingQueue::default());
        let jobs = Arc::new(FlakyJobStore {
            inner: db.clone(),
            fail_updates: AtomicBool::new(false),
        });
        let orchestrator = Arc::new(JobOrchestrator::new(
            jobs.clone(),
            Arc::new(db.clone()),
            queue.clone(),
            engine.clone(),
        ));

        Self {
            db,
            strava,
            cache,
            tokens,
            engine,
            queue,
            jobs,
            orchestrator,
        }
    }

    /// Router over this environment.
    pub fn app(&self) -> (axum::Router, Arc<AppState>) {
        let state = Arc::new(AppState {
            config: Config::test_default(),
            orchestrator: self.orchestrator.clone(),
            activities: Arc::new(self.db.clone()),
        });
        (create_router(state.clone()), state)
    }

    /// Stored token, straight from the user store.
    pub async fn stored_token(&self) -> StravaToken {
        use strava_sync::db::UserStore;
        self.db.find_token(USER_ID).await.unwrap().unwrap()
    }

    pub async fn job(&self, id: &str) -> SyncJob {
        self.orchestrator.get_sync_job(id).await.unwrap()
    }
}

/// Expiry helper for tokens that must be refreshed.
#[allow(dead_code)]
pub fn expired_token() -> StravaToken {
    StravaToken {
        access_token: "stale-access".to_string(),
        refresh_token: "refresh-0".to_string(),
        expires_at: Utc::now() - Duration::minutes(1),
    }
}

#[allow(dead_code)]
pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}
