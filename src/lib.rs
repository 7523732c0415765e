// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Strava-Sync: mirror users' Strava activity history into a local store
//!
//! This crate provides the sync engine, the background job machinery that
//! drives it, and the small HTTP surface that queues and reports on jobs.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::ActivityStore;
use services::JobOrchestrator;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<JobOrchestrator>,
    pub activities: Arc<dyn ActivityStore>,
}
