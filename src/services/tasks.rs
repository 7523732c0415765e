// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Durable task queue for background sync runs.
//!
//! Two backends behind [`TaskQueue`]:
//! - [`CloudTasksQueue`]: Cloud Tasks HTTP targets calling back into
//!   `POST {service_url}/tasks/{task_name}` (production)
//! - [`LocalQueue`]: an in-process channel drained by [`spawn_worker`]
//!   (local development without GCP)
//!
//! Both deliver at least once, so task handlers must be idempotent.

use crate::error::{AppError, Result};
use crate::services::jobs::{JobOrchestrator, SyncUserTask, SYNC_USER_TASK};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Delivery attempts for a task on the local queue before it is dropped.
const LOCAL_MAX_ATTEMPTS: u32 = 5;
const LOCAL_RETRY_BASE: Duration = Duration::from_millis(500);

/// Enqueue side of a durable queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task_name: &str, payload: serde_json::Value) -> Result<()>;
}

/// Cloud Tasks client wrapper.
pub struct CloudTasksQueue {
    project_id: String,
    location: String,
    queue_name: String,
    service_url: String,
}

impl CloudTasksQueue {
    pub fn new(project_id: &str, region: &str, queue_name: &str, service_url: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            location: region.to_string(),
            queue_name: queue_name.to_string(),
            service_url: service_url.trim_end_matches('/').to_string(),
        }
    }

    fn queue_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/queues/{}",
            self.project_id, self.location, self.queue_name
        )
    }

    fn task_url(&self, task_name: &str) -> String {
        format!("{}/tasks/{}", self.service_url, task_name)
    }
}

#[async_trait]
impl TaskQueue for CloudTasksQueue {
    async fn enqueue(&self, task_name: &str, payload: serde_json::Value) -> Result<()> {
        use google_cloud_tasks_v2::client::CloudTasks;
        use google_cloud_tasks_v2::model::{HttpRequest, OidcToken, Task};

        let client = CloudTasks::builder()
            .build()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cloud Tasks client error: {}", e)))?;

        let body = serde_json::to_vec(&payload)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JSON error: {}", e)))?;

        let http_request = HttpRequest::default()
            .set_url(self.task_url(task_name))
            .set_http_method("POST")
            .set_body(axum::body::Bytes::from(body))
            .set_headers(std::collections::HashMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]))
            .set_oidc_token(
                OidcToken::default()
                    .set_service_account_email(format!(
                        "strava-sync-api@{}.iam.gserviceaccount.com",
                        self.project_id
                    ))
                    .set_audience(self.service_url.clone()),
            );

        let task = Task::default().set_http_request(http_request);

        client
            .create_task()
            .set_parent(self.queue_path())
            .set_task(task)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cloud Tasks create error: {}", e)))?;

        tracing::debug!(task_name, queue = %self.queue_name, "Task queued");
        Ok(())
    }
}

/// A task waiting on the local queue.
#[derive(Debug)]
pub struct QueuedTask {
    pub name: String,
    pub payload: serde_json::Value,
}

/// In-process queue for running without Cloud Tasks.
#[derive(Clone)]
pub struct LocalQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
}

/// Consumer end of a [`LocalQueue`], handed to [`spawn_worker`].
pub struct LocalQueueReceiver {
    rx: mpsc::UnboundedReceiver<QueuedTask>,
}

impl LocalQueue {
    pub fn channel() -> (Self, LocalQueueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, LocalQueueReceiver { rx })
    }
}

impl LocalQueueReceiver {
    /// Next queued task, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<QueuedTask> {
        self.rx.recv().await
    }
}

#[async_trait]
impl TaskQueue for LocalQueue {
    async fn enqueue(&self, task_name: &str, payload: serde_json::Value) -> Result<()> {
        self.tx
            .send(QueuedTask {
                name: task_name.to_string(),
                payload,
            })
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Local task queue is closed")))
    }
}

/// Drain a local queue, running each task on its own tokio task.
///
/// Failed deliveries are retried with exponential backoff, like Cloud Tasks
/// would, up to a fixed number of attempts.
pub fn spawn_worker(
    mut receiver: LocalQueueReceiver,
    orchestrator: Arc<JobOrchestrator>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(task) = receiver.recv().await {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { deliver(&orchestrator, task).await });
        }
        tracing::info!("Local task queue closed, worker exiting");
    })
}

async fn deliver(orchestrator: &JobOrchestrator, task: QueuedTask) {
    if task.name != SYNC_USER_TASK {
        tracing::warn!(task_name = %task.name, "Dropping task with unknown name");
        return;
    }

    let payload: SyncUserTask = match serde_json::from_value(task.payload) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "Dropping malformed sync-user task");
            return;
        }
    };

    for attempt in 1..=LOCAL_MAX_ATTEMPTS {
        match orchestrator.process_task(&payload).await {
            Ok(_) => return,
            Err(AppError::NotFound(msg)) => {
                tracing::warn!(
                    sync_job_id = %payload.sync_job_id,
                    %msg,
                    "Sync job gone, dropping task"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(
                    sync_job_id = %payload.sync_job_id,
                    attempt,
                    error = %e,
                    "Sync task delivery failed"
                );
                if attempt < LOCAL_MAX_ATTEMPTS {
                    tokio::time::sleep(LOCAL_RETRY_BASE * 2u32.pow(attempt - 1)).await;
                }
            }
        }
    }

    tracing::error!(
        sync_job_id = %payload.sync_job_id,
        attempts = LOCAL_MAX_ATTEMPTS,
        "Giving up on sync task"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_tasks_targets_task_route() {
        let queue = CloudTasksQueue::new(
            "my-project",
            "us-west1",
            "activity-sync",
            "https://sync.example.com/",
        );
        assert_eq!(
            queue.queue_path(),
            "projects/my-project/locations/us-west1/queues/activity-sync"
        );
        assert_eq!(
            queue.task_url(SYNC_USER_TASK),
            "https://sync.example.com/tasks/sync-user"
        );
    }

    #[tokio::test]
    async fn local_queue_delivers_in_order() {
        let (queue, mut receiver) = LocalQueue::channel();
        queue
            .enqueue("a", serde_json::json!({ "n": 1 }))
            .await
            .unwrap();
        queue
            .enqueue("b", serde_json::json!({ "n": 2 }))
            .await
            .unwrap();

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first.name, "a");
        assert_eq!(second.payload["n"], 2);
    }

    #[tokio::test]
    async fn local_queue_reports_closed_receiver() {
        let (queue, receiver) = LocalQueue::channel();
        drop(receiver);
        let err = queue.enqueue("a", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "internal");
    }
}
