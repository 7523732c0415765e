// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod jobs;
pub mod kms;
pub mod strava;
pub mod sync;
pub mod tasks;
pub mod token;

pub use jobs::{JobOrchestrator, SyncUserTask, TaskOutcome, SYNC_USER_TASK};
pub use kms::KmsService;
pub use strava::{StravaActivity, StravaApi, StravaClient, TokenRefreshResponse};
pub use sync::{SyncEngine, PER_PAGE};
pub use tasks::{spawn_worker, CloudTasksQueue, LocalQueue, LocalQueueReceiver, TaskQueue};
pub use token::{TokenCache, TokenProvider};
