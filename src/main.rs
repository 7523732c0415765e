// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava-Sync API Server
//!
//! Queues per-user sync jobs and runs them as Cloud Tasks (or an
//! in-process queue) deliver them, mirroring Strava activities into
//! Firestore.

use std::sync::Arc;
use strava_sync::{
    config::{Config, QueueBackend, StorageBackend},
    db::{ActivityStore, FirestoreDb, FirestoreUserStore, MemoryDb, SyncJobStore, UserStore},
    services::{
        spawn_worker, CloudTasksQueue, JobOrchestrator, KmsService, LocalQueue, StravaApi,
        StravaClient, SyncEngine, TaskQueue, TokenCache, TokenProvider,
    },
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type Stores = (
    Arc<dyn UserStore>,
    Arc<dyn ActivityStore>,
    Arc<dyn SyncJobStore>,
);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Strava-Sync API");

    let (users, activities, jobs) = open_stores(&config).await?;

    let strava: Arc<dyn StravaApi> = Arc::new(StravaClient::new(
        config.strava_client_id.clone(),
        config.strava_client_secret.clone(),
        config.strava_timeout,
    )?);

    // Shared across every sync run in this instance
    let token_cache = Arc::new(TokenCache::new());
    let tokens = TokenProvider::new(strava.clone(), users.clone(), token_cache);
    tracing::info!("Token cache initialized");

    let engine = SyncEngine::new(strava, tokens, activities.clone());

    let (queue, local_receiver) = match config.queue_backend {
        QueueBackend::CloudTasks => {
            tracing::info!(
                project = %config.gcp_project_id,
                queue = %config.task_queue_name,
                "Cloud Tasks queue initialized"
            );
            let queue: Arc<dyn TaskQueue> = Arc::new(CloudTasksQueue::new(
                &config.gcp_project_id,
                &config.gcp_region,
                &config.task_queue_name,
                &config.service_url,
            ));
            (queue, None)
        }
        QueueBackend::Local => {
            tracing::info!("Using in-process task queue");
            let (queue, receiver) = LocalQueue::channel();
            let queue: Arc<dyn TaskQueue> = Arc::new(queue);
            (queue, Some(receiver))
        }
    };

    let orchestrator = Arc::new(JobOrchestrator::new(jobs, users, queue, engine));

    if let Some(receiver) = local_receiver {
        spawn_worker(receiver, orchestrator.clone());
    }

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        orchestrator,
        activities,
    });

    // Build router
    let app = strava_sync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn open_stores(config: &Config) -> Result<Stores, Box<dyn std::error::Error>> {
    match config.storage_backend {
        StorageBackend::Firestore => {
            let db = FirestoreDb::new(&config.gcp_project_id).await?;

            let kms = KmsService::new(
                &config.gcp_project_id,
                &config.gcp_region,
                "token-encryption",
            )
            .await?;
            tracing::info!("KMS service initialized");

            let users: Arc<dyn UserStore> = Arc::new(FirestoreUserStore::new(db.clone(), kms));
            let activities: Arc<dyn ActivityStore> = Arc::new(db.clone());
            let jobs: Arc<dyn SyncJobStore> = Arc::new(db);
            Ok((users, activities, jobs))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; nothing survives a restart");
            let db = MemoryDb::new();
            let users: Arc<dyn UserStore> = Arc::new(db.clone());
            let activities: Arc<dyn ActivityStore> = Arc::new(db.clone());
            let jobs: Arc<dyn SyncJobStore> = Arc::new(db);
            Ok((users, activities, jobs))
        }
    }
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("strava_sync=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
