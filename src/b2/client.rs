//! Backblaze B2 Listing Client
//!
//! Authenticated, read-only access to one bucket: enough to list a folder
//! level for the prefetch daemon.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::errors::B2Error;
use super::types::{folder_prefix, to_listing, ListFileNamesRequest, ListFilesResponse};
use crate::listing::DirectoryListing;

/// B2 API base URL for authorization (v3 for nested apiInfo structure)
const B2_AUTH_URL: &str = "https://api.backblazeb2.com/b2api/v3/b2_authorize_account";

/// HTTP client timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of retries for retryable errors
const MAX_RETRIES: u32 = 3;

/// Names requested per listing page
const PAGE_SIZE: u32 = 1000;

/// Auth state that can be refreshed on 401
struct AuthState {
    auth_token: String,
    api_url: String,
}

/// Response from b2_authorize_account API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeAccountResponse {
    account_id: String,
    authorization_token: String,
    api_info: ApiInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInfo {
    storage_api: StorageApiInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageApiInfo {
    api_url: String,
}

/// Response from b2_list_buckets API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListBucketsResponse {
    buckets: Vec<BucketInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketInfo {
    bucket_id: String,
    bucket_name: String,
}

/// B2 client scoped to one bucket
#[derive(Clone)]
pub struct B2Client {
    http_client: Client,
    auth_state: Arc<RwLock<AuthState>>,
    /// Stored credentials for re-authorization
    key_id: String,
    key: String,
    bucket_id: String,
    bucket_name: String,
}

impl B2Client {
    /// Authorize with B2 and resolve `bucket_name`
    pub async fn authorize(key_id: &str, key: &str, bucket_name: &str) -> Result<Self> {
        info!(bucket = bucket_name, "Authorizing with B2 API...");

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let auth = authorize_account(&http_client, key_id, key).await?;
        let api_url = auth.api_info.storage_api.api_url;
        debug!(api_url = %api_url, "B2 authorization successful");

        let bucket_id = find_bucket_id(
            &http_client,
            &api_url,
            &auth.authorization_token,
            &auth.account_id,
            bucket_name,
        )
        .await?;

        info!(bucket_name = bucket_name, bucket_id = %bucket_id, "B2 client ready");
        Ok(Self {
            http_client,
            auth_state: Arc::new(RwLock::new(AuthState {
                auth_token: auth.authorization_token,
                api_url,
            })),
            key_id: key_id.to_string(),
            key: key.to_string(),
            bucket_id,
            bucket_name: bucket_name.to_string(),
        })
    }

    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    fn auth(&self) -> (String, String) {
        let state = self.auth_state.read().unwrap_or_else(|e| e.into_inner());
        (state.auth_token.clone(), state.api_url.clone())
    }

    /// Re-authorize after the token expired
    async fn refresh_auth(&self) -> Result<()> {
        info!("Refreshing B2 auth token...");
        let auth = authorize_account(&self.http_client, &self.key_id, &self.key).await?;
        let mut state = self.auth_state.write().unwrap_or_else(|e| e.into_inner());
        state.auth_token = auth.authorization_token;
        state.api_url = auth.api_info.storage_api.api_url;
        info!("B2 auth token refreshed successfully");
        Ok(())
    }

    /// List one folder level, following pagination
    ///
    /// Retries retryable errors with backoff and refreshes the token once
    /// on expiry.
    pub async fn list_folder(&self, folder: &str) -> Result<DirectoryListing, B2Error> {
        let prefix = folder_prefix(folder);
        let mut files = Vec::new();
        let mut start_file_name: Option<String> = None;

        loop {
            let page = self
                .with_retry(folder, || {
                    self.list_page(prefix.as_deref(), start_file_name.as_deref())
                })
                .await?;
            files.extend(page.files);
            match page.next_file_name {
                Some(next) => start_file_name = Some(next),
                None => break,
            }
        }

        debug!(folder = folder, count = files.len(), "Listed folder from B2");
        Ok(to_listing(folder, files))
    }

    async fn list_page(
        &self,
        prefix: Option<&str>,
        start_file_name: Option<&str>,
    ) -> Result<ListFilesResponse, B2Error> {
        let (auth_token, api_url) = self.auth();
        let request = ListFileNamesRequest {
            bucket_id: &self.bucket_id,
            prefix,
            delimiter: "/",
            max_file_count: PAGE_SIZE,
            start_file_name,
        };

        let response = self
            .http_client
            .post(format!("{}/b2api/v2/b2_list_file_names", api_url))
            .header("Authorization", auth_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(B2Error::from_status(status.as_u16(), &body));
        }
        Ok(response.json().await?)
    }

    /// Run a B2 call with exponential backoff on retryable errors
    async fn with_retry<F, Fut, T>(&self, path: &str, f: F) -> Result<T, B2Error>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, B2Error>>,
    {
        let backoff_ms = [500u64, 1000, 2000];
        let mut attempt = 0u32;

        loop {
            let error = match f().await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };
            if !error.is_retryable() || attempt >= MAX_RETRIES {
                return Err(error);
            }

            if matches!(error, B2Error::AuthExpired) && attempt == 0 {
                warn!(path = path, "Auth expired, refreshing token...");
                if let Err(refresh_err) = self.refresh_auth().await {
                    warn!(error = %refresh_err, "Failed to refresh auth token");
                }
            }

            let delay = backoff_ms.get(attempt as usize).copied().unwrap_or(2000);
            warn!(
                path = path,
                attempt = attempt + 1,
                max = MAX_RETRIES,
                delay_ms = delay,
                error = %error,
                "Retrying B2 listing"
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }
}

async fn authorize_account(
    http_client: &Client,
    key_id: &str,
    key: &str,
) -> Result<AuthorizeAccountResponse> {
    let credentials = format!("{}:{}", key_id, key);
    let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);

    let response = http_client
        .get(B2_AUTH_URL)
        .header("Authorization", format!("Basic {}", encoded))
        .send()
        .await
        .context("Failed to connect to B2 API")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("B2 authorization failed ({}): {}", status, body));
    }

    response
        .json()
        .await
        .context("Failed to parse B2 auth response")
}

async fn find_bucket_id(
    http_client: &Client,
    api_url: &str,
    auth_token: &str,
    account_id: &str,
    bucket_name: &str,
) -> Result<String> {
    let response = http_client
        .post(format!("{}/b2api/v2/b2_list_buckets", api_url))
        .header("Authorization", auth_token)
        .json(&serde_json::json!({
            "accountId": account_id,
            "bucketName": bucket_name
        }))
        .send()
        .await
        .context("Failed to list buckets")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("Failed to list buckets ({}): {}", status, body));
    }

    let list: ListBucketsResponse = response
        .json()
        .await
        .context("Failed to parse bucket list")?;

    list.buckets
        .into_iter()
        .find(|b| b.bucket_name == bucket_name)
        .map(|b| b.bucket_id)
        .ok_or_else(|| anyhow!("Bucket '{}' not found", bucket_name))
}
