// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Cloud Run injects secrets as environment variables via secret bindings,
//! so everything is read from the process environment (or a local `.env`).

use std::env;
use std::time::Duration;

/// Name of the Cloud Tasks queue that delivers sync tasks.
pub const SYNC_QUEUE_NAME: &str = "activity-sync";

/// Default timeout applied to every Strava API call.
const DEFAULT_STRAVA_TIMEOUT_SECS: u64 = 30;

/// Where activities, jobs and tokens are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Firestore,
    /// Process-local storage; for development and tests.
    Memory,
}

/// How sync tasks are delivered to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    CloudTasks,
    /// In-process channel consumed by a background worker task.
    Local,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Strava OAuth client ID (public)
    pub strava_client_id: String,
    /// Dashboard URL allowed by CORS
    pub frontend_url: String,
    /// Public URL of this service, used as the Cloud Tasks target
    pub service_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// GCP region (Cloud Tasks queue and KMS key ring location)
    pub gcp_region: String,
    /// Cloud Tasks queue name
    pub task_queue_name: String,
    /// Server port
    pub port: u16,
    /// Per-call timeout for Strava requests
    pub strava_timeout: Duration,
    pub storage_backend: StorageBackend,
    pub queue_backend: QueueBackend,

    // --- Secrets ---
    /// Strava OAuth client secret
    pub strava_client_secret: String,
    /// JWT signing key for API bearer tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
}

impl Config {
    /// Config for tests: offline backends, dummy secrets.
    pub fn test_default() -> Self {
        Self {
            strava_client_id: "test_client_id".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            service_url: "http://localhost:8080".to_string(),
            gcp_project_id: "test-project".to_string(),
            gcp_region: "us-west1".to_string(),
            task_queue_name: SYNC_QUEUE_NAME.to_string(),
            port: 8080,
            strava_timeout: Duration::from_secs(DEFAULT_STRAVA_TIMEOUT_SECS),
            storage_backend: StorageBackend::Memory,
            queue_backend: QueueBackend::Local,
            strava_client_secret: "test_secret".to_string(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let strava_timeout = match env::var("STRAVA_TIMEOUT_SECS") {
            Ok(v) => v
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or(ConfigError::Invalid("STRAVA_TIMEOUT_SECS", v))?,
            Err(_) => Duration::from_secs(DEFAULT_STRAVA_TIMEOUT_SECS),
        };

        let storage_backend = match env::var("STORAGE_BACKEND").as_deref() {
            Err(_) | Ok("firestore") => StorageBackend::Firestore,
            Ok("memory") => StorageBackend::Memory,
            Ok(other) => return Err(ConfigError::Invalid("STORAGE_BACKEND", other.to_string())),
        };

        let queue_backend = match env::var("QUEUE_BACKEND").as_deref() {
            Err(_) | Ok("cloud-tasks") => QueueBackend::CloudTasks,
            Ok("local") => QueueBackend::Local,
            Ok(other) => return Err(ConfigError::Invalid("QUEUE_BACKEND", other.to_string())),
        };

        Ok(Self {
            strava_client_id: env::var("STRAVA_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("STRAVA_CLIENT_ID"))?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            service_url: env::var("SERVICE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-west1".to_string()),
            task_queue_name: env::var("TASK_QUEUE_NAME")
                .unwrap_or_else(|_| SYNC_QUEUE_NAME.to_string()),
            port,
            strava_timeout,
            storage_backend,
            queue_backend,

            strava_client_secret: env::var("STRAVA_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("STRAVA_CLIENT_SECRET"))?,
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
