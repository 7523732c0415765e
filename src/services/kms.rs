// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud KMS service for encrypting/decrypting stored Strava credentials.
//!
//! Uses direct KMS encryption (not envelope encryption). Every ciphertext is
//! bound to its owner through additional authenticated data, so a token
//! document copied onto another user fails to decrypt.

use crate::error::AppError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// KMS encryption service.
#[derive(Clone)]
pub struct KmsService {
    /// Full resource path to the KMS key
    /// Format: projects/{project}/locations/{location}/keyRings/{ring}/cryptoKeys/{key}
    key_path: String,

    /// GCP KMS client; `None` in mock mode
    client: Option<std::sync::Arc<google_cloud_kms::client::Client>>,
}

impl KmsService {
    /// KMS Key Ring Name
    const KEY_RING_NAME: &str = "strava-sync";

    /// Create a new KMS service connected to GCP KMS.
    pub async fn new(project_id: &str, location: &str, key_name: &str) -> Result<Self, AppError> {
        let key_path = format!(
            "projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}",
            project_id,
            location,
            Self::KEY_RING_NAME,
            key_name
        );

        let config = google_cloud_kms::client::ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create KMS auth config: {}", e))
            })?;

        let client = google_cloud_kms::client::Client::new(config)
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create KMS client: {}", e))
            })?;

        Ok(Self {
            key_path,
            client: Some(std::sync::Arc::new(client)),
        })
    }

    /// Create a mock KMS service for testing (offline mode).
    /// Only available in debug/test builds.
    #[cfg(debug_assertions)]
    pub fn new_mock() -> Self {
        Self {
            key_path: "projects/mock/locations/mock/keyRings/mock/cryptoKeys/mock".to_string(),
            client: None,
        }
    }

    /// AAD binding a ciphertext to its owner.
    pub fn user_aad(user_id: u64) -> Vec<u8> {
        format!("user_id:{}", user_id).into_bytes()
    }

    /// Encrypt plaintext data using KMS.
    /// Returns base64-encoded ciphertext.
    pub async fn encrypt(&self, plaintext: &str, aad: &[u8]) -> Result<String, AppError> {
        use google_cloud_googleapis::cloud::kms::v1::EncryptRequest;

        // Mock mode: "<b64 aad>.<b64 plaintext>" so AAD mismatches still fail
        #[cfg(debug_assertions)]
        {
            if self.client.is_none() {
                return Ok(format!("{}.{}", BASE64.encode(aad), BASE64.encode(plaintext)));
            }
        }

        // In release builds a missing client is always an error.
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("KMS client not connected")))?;

        let req = EncryptRequest {
            name: self.key_path.clone(),
            plaintext: plaintext.as_bytes().to_vec(),
            additional_authenticated_data: aad.to_vec(),
            ..Default::default()
        };

        let response = client
            .encrypt(req, None)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("KMS encrypt failed: {}", e)))?;

        Ok(BASE64.encode(response.ciphertext))
    }

    /// Decrypt base64-encoded ciphertext using KMS.
    pub async fn decrypt(&self, ciphertext_b64: &str, aad: &[u8]) -> Result<String, AppError> {
        use google_cloud_googleapis::cloud::kms::v1::DecryptRequest;

        #[cfg(debug_assertions)]
        {
            if self.client.is_none() {
                return mock_decrypt(ciphertext_b64, aad);
            }
        }

        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("KMS client not connected")))?;

        let ciphertext = BASE64.decode(ciphertext_b64).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Base64 ciphertext decode failed: {}", e))
        })?;

        let req = DecryptRequest {
            name: self.key_path.clone(),
            ciphertext,
            additional_authenticated_data: aad.to_vec(),
            ..Default::default()
        };

        let response = client
            .decrypt(req, None)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("KMS decrypt failed: {}", e)))?;

        String::from_utf8(response.plaintext)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("UTF-8 decode failed: {}", e)))
    }
}

#[cfg(debug_assertions)]
fn mock_decrypt(ciphertext: &str, aad: &[u8]) -> Result<String, AppError> {
    let mock_err = |msg: &str| AppError::Internal(anyhow::anyhow!("{} (mock)", msg));

    let (aad_b64, plaintext_b64) = ciphertext
        .split_once('.')
        .ok_or_else(|| mock_err("Malformed ciphertext"))?;
    let stored_aad = BASE64
        .decode(aad_b64)
        .map_err(|_| mock_err("Base64 AAD decode failed"))?;
    if stored_aad != aad {
        return Err(mock_err("AAD mismatch"));
    }
    let bytes = BASE64
        .decode(plaintext_b64)
        .map_err(|_| mock_err("Base64 ciphertext decode failed"))?;
    String::from_utf8(bytes).map_err(|_| mock_err("UTF-8 decode failed"))
}

/// Encrypt an access/refresh token pair for a user.
pub async fn encrypt_tokens(
    kms: &KmsService,
    access_token: &str,
    refresh_token: &str,
    user_id: u64,
) -> Result<(String, String), AppError> {
    let aad = KmsService::user_aad(user_id);
    let encrypted_access = kms.encrypt(access_token, &aad).await?;
    let encrypted_refresh = kms.encrypt(refresh_token, &aad).await?;
    Ok((encrypted_access, encrypted_refresh))
}

/// Decrypt an access/refresh token pair for a user.
pub async fn decrypt_tokens(
    kms: &KmsService,
    encrypted_access: &str,
    encrypted_refresh: &str,
    user_id: u64,
) -> Result<(String, String), AppError> {
    let aad = KmsService::user_aad(user_id);
    let access_token = kms.decrypt(encrypted_access, &aad).await?;
    let refresh_token = kms.decrypt(encrypted_refresh, &aad).await?;
    Ok((access_token, refresh_token))
}
