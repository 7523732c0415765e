// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides the store implementations for:
//! - Users and their KMS-encrypted Strava tokens
//! - Activities (mirrored Strava activities)
//! - Sync jobs

use crate::db::{collections, ActivityStore, SyncJobStore, UserStore};
use crate::error::AppError;
use crate::models::{
    Activity, ActivityQuery, ActivityUpdate, StravaToken, SyncJob, SyncJobUpdate, User,
    UserTokens,
};
use crate::services::kms::{decrypt_tokens, encrypt_tokens, KmsService};
use crate::time_utils::format_utc_rfc3339;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};

const MAX_CONCURRENT_DB_OPS: usize = 50;

fn db_err(e: impl std::fmt::Display) -> AppError {
    AppError::Persistence(e.to_string())
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // The emulator takes an unauthenticated connection; skip credential lookup.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Persistence(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client; every operation fails with `Persistence`.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| {
                AppError::Persistence("Database not connected (offline mode)".to_string())
            })
    }

    // ─── User Operations ─────────────────────────────────────────

    /// Get a user by their Strava athlete ID.
    pub async fn get_user(&self, user_id: u64) -> Result<Option<User>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(&user_id.to_string())
            .await
            .map_err(db_err)
    }

    /// Create or update a user.
    pub async fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        let _: User = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(user.id.to_string())
            .object(user)
            .execute()
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // ─── Token Operations ────────────────────────────────────────

    /// Get encrypted tokens for a user.
    pub async fn get_tokens(&self, user_id: u64) -> Result<Option<UserTokens>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::TOKENS)
            .obj()
            .one(&user_id.to_string())
            .await
            .map_err(db_err)
    }

    /// Store encrypted tokens for a user.
    pub async fn set_tokens(&self, user_id: u64, tokens: &UserTokens) -> Result<(), AppError> {
        let _: UserTokens = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::TOKENS)
            .document_id(user_id.to_string())
            .object(tokens)
            .execute()
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // ─── Activity Operations ─────────────────────────────────────

    async fn get_activity(
        &self,
        user_id: u64,
        strava_id: u64,
    ) -> Result<Option<Activity>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::ACTIVITIES)
            .obj()
            .one(&Activity::document_id(user_id, strava_id))
            .await
            .map_err(db_err)
    }

    async fn set_activity(&self, activity: &Activity) -> Result<(), AppError> {
        let _: Activity = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::ACTIVITIES)
            .document_id(&activity.id)
            .object(activity)
            .execute()
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl ActivityStore for FirestoreDb {
    /// One batched document read; document IDs are derived from the pair.
    async fn find_by_external_ids(
        &self,
        user_id: u64,
        strava_ids: &[u64],
    ) -> Result<Vec<Activity>, AppError> {
        if strava_ids.is_empty() {
            return Ok(Vec::new());
        }

        let doc_ids: Vec<String> = strava_ids
            .iter()
            .map(|id| Activity::document_id(user_id, *id))
            .collect();

        let found: Vec<(String, Option<Activity>)> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::ACTIVITIES)
            .obj::<Activity>()
            .batch(doc_ids)
            .await
            .map_err(db_err)?
            .collect()
            .await;

        Ok(found.into_iter().filter_map(|(_, a)| a).collect())
    }

    /// Uses create-only writes, so a pair that already exists (for example
    /// inserted by a concurrent run) is skipped rather than overwritten.
    async fn insert_many(&self, activities: Vec<Activity>) -> Result<u32, AppError> {
        let client = self.get_client()?;

        let outcomes = stream::iter(activities)
            .map(|activity| async move {
                let result: Result<Activity, _> = client
                    .fluent()
                    .insert()
                    .into(collections::ACTIVITIES)
                    .document_id(&activity.id)
                    .object(&activity)
                    .execute()
                    .await;

                match result {
                    Ok(_) => Ok(true),
                    Err(firestore::errors::FirestoreError::DataConflictError(_)) => {
                        tracing::debug!(
                            user_id = activity.user_id,
                            strava_id = activity.strava_id,
                            "Activity already exists, skipping insert"
                        );
                        Ok(false)
                    }
                    Err(e) => Err(db_err(e)),
                }
            })
            .buffer_unordered(MAX_CONCURRENT_DB_OPS)
            .collect::<Vec<Result<bool, AppError>>>()
            .await;

        let mut inserted = 0;
        for outcome in outcomes {
            if outcome? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn update_by_external_id(
        &self,
        user_id: u64,
        strava_id: u64,
        update: ActivityUpdate,
    ) -> Result<bool, AppError> {
        let Some(mut activity) = self.get_activity(user_id, strava_id).await? else {
            return Ok(false);
        };
        update.apply(&mut activity, Utc::now());
        self.set_activity(&activity).await?;
        Ok(true)
    }

    async fn list_for_user(
        &self,
        user_id: u64,
        query: &ActivityQuery,
    ) -> Result<Vec<Activity>, AppError> {
        let has_details = query.has_details;
        let after = query.after.map(format_utc_rfc3339);
        let before = query.before.map(format_utc_rfc3339);

        self.get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .filter(move |q| {
                q.for_all([
                    q.field("user_id").eq(user_id),
                    has_details.and_then(|v| q.field("has_details").eq(v)),
                    after
                        .clone()
                        .and_then(|d| q.field("start_date").greater_than(d)),
                    before.clone().and_then(|d| q.field("start_date").less_than(d)),
                ])
            })
            .order_by([("start_date", firestore::FirestoreQueryDirection::Descending)])
            .limit(query.limit)
            .offset(query.offset)
            .obj()
            .query()
            .await
            .map_err(db_err)
    }
}

#[async_trait]
impl SyncJobStore for FirestoreDb {
    async fn create(&self, job: &SyncJob) -> Result<(), AppError> {
        let _: SyncJob = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::SYNC_JOBS)
            .document_id(&job.id)
            .object(job)
            .execute()
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Read, transition check and write share one transaction, so two
    /// deliveries racing on the same job cannot both finish it.
    async fn update_by_id(&self, id: &str, update: SyncJobUpdate) -> Result<SyncJob, AppError> {
        let client = self.get_client()?;
        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to begin transaction: {}", e)))?;

        // Reads through the transaction lock the document until commit.
        let tx_client = client.clone_with_consistency_selector(
            firestore::FirestoreConsistencySelector::Transaction(
                transaction.transaction_id().clone(),
            ),
        );

        let job = match read_transition(&tx_client, id, update).await {
            Ok(job) => job,
            Err(e) => {
                let _ = transaction.rollback().await;
                return Err(e);
            }
        };

        client
            .fluent()
            .update()
            .in_col(collections::SYNC_JOBS)
            .document_id(&job.id)
            .object(&job)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Persistence(format!("Failed to add sync job to transaction: {}", e))
            })?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Persistence(format!("Transaction commit failed: {}", e)))?;

        tracing::debug!(sync_job_id = %job.id, status = %job.status, "Sync job updated");
        Ok(job)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SyncJob>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::SYNC_JOBS)
            .obj()
            .one(id)
            .await
            .map_err(db_err)
    }

    async fn find_by_user_id(&self, user_id: u64) -> Result<Vec<SyncJob>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::SYNC_JOBS)
            .filter(move |q| q.for_all([q.field("user_id").eq(user_id)]))
            .order_by([("created_at", firestore::FirestoreQueryDirection::Descending)])
            .obj()
            .query()
            .await
            .map_err(db_err)
    }
}

/// Load a job and apply a transition to it, without writing.
async fn read_transition(
    client: &firestore::FirestoreDb,
    id: &str,
    update: SyncJobUpdate,
) -> Result<SyncJob, AppError> {
    let mut job: SyncJob = client
        .fluent()
        .select()
        .by_id_in(collections::SYNC_JOBS)
        .obj()
        .one(id)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AppError::NotFound(format!("Sync job {}", id)))?;
    update.apply(&mut job)?;
    Ok(job)
}

/// User store backed by Firestore, with tokens encrypted through KMS.
#[derive(Clone)]
pub struct FirestoreUserStore {
    db: FirestoreDb,
    kms: KmsService,
}

impl FirestoreUserStore {
    pub fn new(db: FirestoreDb, kms: KmsService) -> Self {
        Self { db, kms }
    }
}

#[async_trait]
impl UserStore for FirestoreUserStore {
    async fn find_by_id(&self, user_id: u64) -> Result<Option<User>, AppError> {
        self.db.get_user(user_id).await
    }

    async fn find_token(&self, user_id: u64) -> Result<Option<StravaToken>, AppError> {
        let Some(tokens) = self.db.get_tokens(user_id).await? else {
            return Ok(None);
        };

        let (access_token, refresh_token) = decrypt_tokens(
            &self.kms,
            &tokens.access_token_encrypted,
            &tokens.refresh_token_encrypted,
            user_id,
        )
        .await?;

        let expires_at = DateTime::parse_from_rfc3339(&tokens.expires_at)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to parse expiry: {}", e)))?
            .with_timezone(&Utc);

        Ok(Some(StravaToken {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    async fn update_token(&self, user_id: u64, token: &StravaToken) -> Result<(), AppError> {
        let (access_token_encrypted, refresh_token_encrypted) = encrypt_tokens(
            &self.kms,
            &token.access_token,
            &token.refresh_token,
            user_id,
        )
        .await?;

        let tokens = UserTokens {
            access_token_encrypted,
            refresh_token_encrypted,
            expires_at: format_utc_rfc3339(token.expires_at),
        };
        self.db.set_tokens(user_id, &tokens).await
    }
}
