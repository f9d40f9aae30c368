//! IPFS HTTP API client.
//!
//! Talks to a Kubo-compatible daemon: `add` to store, `cat` to fetch and
//! `version` as the readiness probe. Every endpoint of that API is a POST.

use super::{ContentResult, ContentStore, ContentStoreError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, multipart};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Clone, Debug)]
pub struct IpfsContentStore {
    client: reqwest::Client,
    api_url: String,
    timeout: Duration,
}

impl IpfsContentStore {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> ContentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ContentStoreError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, command)
    }

    async fn send(&self, request: reqwest::RequestBuilder, operation: &str) -> ContentResult<reqwest::Response> {
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                ContentStoreError::Timeout(self.timeout)
            } else {
                ContentStoreError::Unavailable(format!("{operation}: {e}"))
            }
        })
    }

    /// Pull the daemon's error message out of a failed response.
    async fn error_message(resp: reqwest::Response) -> String {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(parsed) => parsed.message,
            Err(_) if body.is_empty() => format!("HTTP {status}"),
            Err(_) => body,
        }
    }
}

/// Messages the daemon uses when a CID is unknown or unparseable.
fn is_missing_object(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["not found", "invalid path", "invalid cid", "no link named"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[async_trait]
impl ContentStore for IpfsContentStore {
    async fn put(&self, data: Bytes) -> ContentResult<String> {
        let size = data.len();
        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(data.to_vec()).file_name("chunk"),
        );
        let request = self
            .client
            .post(self.endpoint("add"))
            .query(&[("pin", "true"), ("quiet", "true")])
            .multipart(form);

        let resp = self.send(request, "add").await?;
        let status = resp.status();
        if status.is_client_error() {
            return Err(ContentStoreError::Rejected(Self::error_message(resp).await));
        }
        if !status.is_success() {
            return Err(ContentStoreError::Unavailable(format!(
                "add: {}",
                Self::error_message(resp).await
            )));
        }

        let added: AddResponse = resp
            .json()
            .await
            .map_err(|e| ContentStoreError::Unavailable(format!("add: malformed response: {e}")))?;
        debug!("ipfs add stored {} bytes as {}", size, added.hash);
        Ok(added.hash)
    }

    async fn get(&self, hash: &str) -> ContentResult<Bytes> {
        let request = self.client.post(self.endpoint("cat")).query(&[("arg", hash)]);
        let resp = self.send(request, "cat").await?;

        match resp.status() {
            status if status.is_success() => resp
                .bytes()
                .await
                .map_err(|e| ContentStoreError::Unavailable(format!("cat: {e}"))),
            StatusCode::NOT_FOUND => Err(ContentStoreError::NotFound(hash.to_string())),
            _ => {
                let message = Self::error_message(resp).await;
                if is_missing_object(&message) {
                    Err(ContentStoreError::NotFound(hash.to_string()))
                } else {
                    Err(ContentStoreError::Unavailable(format!("cat: {message}")))
                }
            }
        }
    }

    async fn ping(&self) -> ContentResult<()> {
        let resp = self.send(self.client.post(self.endpoint("version")), "version").await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ContentStoreError::Unavailable(format!(
                "version: {}",
                Self::error_message(resp).await
            )))
        }
    }

    fn backend(&self) -> &'static str {
        "ipfs"
    }
}
