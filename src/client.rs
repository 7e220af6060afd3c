//! HTTP client to the remote media server (C3).
//!
//! Grounded on `original_source/src/retrovue/content_sources/plex/client.py`
//! for the endpoint shapes, header set, and pagination contract, and on the
//! teacher's `metadata/request_client.rs` for the reqwest usage pattern
//! (typed client, JSON body, status-code-driven error mapping). Retries
//! reuse [`crate::error_handling::ErrorKind::Network`]'s policy rather than
//! hand-rolling a second backoff table.

use std::time::Duration;

use async_stream::try_stream;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio_stream::Stream;

use crate::error_handling::ErrorKind;

const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];
const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("item not found")]
    NotFound,
    #[error("failed to parse response body: {0}")]
    Parse(String),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteLibrary {
    pub key: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "Location", default)]
    pub locations: Vec<RemoteLocation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteLocation {
    pub path: String,
}

#[derive(Debug, Default, Deserialize)]
struct MediaContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<serde_json::Value>,
    #[serde(rename = "Directory", default)]
    directory: Vec<serde_json::Value>,
    #[serde(rename = "totalSize", default)]
    total_size: i64,
}

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(rename = "MediaContainer", default)]
    media_container: MediaContainer,
}

/// Typed HTTP client to the remote media server. Cheap to clone: it wraps a
/// pooled `reqwest::Client` and an `Arc`-free config struct.
#[derive(Clone)]
pub struct PlexClient {
    http: Client,
    config: ClientConfig,
}

impl PlexClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        headers.insert(
            "X-Plex-Accept",
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "X-Plex-Product",
            header::HeaderValue::from_static("media-catalog-core"),
        );
        headers.insert(
            "X-Plex-Client-Identifier",
            header::HeaderValue::from_static("media-catalog-core"),
        );
        let mut token_value = header::HeaderValue::from_str(&config.token)
            .map_err(|e| ClientError::Parse(e.to_string()))?;
        token_value.set_sensitive(true);
        headers.insert("X-Plex-Token", token_value);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn request_envelope(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Envelope, ClientError> {
        let policy = ErrorKind::Network.retry_policy();
        let mut attempt = 1;
        loop {
            let response = self
                .http
                .get(self.url(path))
                .query(params)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) if attempt < policy.max_attempts => {
                    tracing::warn!(attempt, error = %e, "request failed, retrying");
                    tokio::time::sleep(policy.delay_for_attempt(attempt + 1)).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(ClientError::Request(e)),
            };

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(ClientError::NotFound);
            }
            if !status.is_success() {
                if RETRYABLE_STATUSES.contains(&status.as_u16()) && attempt < policy.max_attempts {
                    tracing::warn!(attempt, status = status.as_u16(), "retryable status, retrying");
                    tokio::time::sleep(policy.delay_for_attempt(attempt + 1)).await;
                    attempt += 1;
                    continue;
                }
                return Err(ClientError::Status(status.as_u16()));
            }

            return self.parse_body(response).await;
        }
    }

    async fn parse_body(&self, response: reqwest::Response) -> Result<Envelope, ClientError> {
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;

        if content_type.contains("xml") {
            quick_xml::de::from_str(&body).map_err(|e| ClientError::Parse(e.to_string()))
        } else {
            serde_json::from_str(&body).map_err(|e| ClientError::Parse(e.to_string()))
        }
    }

    pub async fn get_libraries(&self) -> Result<Vec<RemoteLibrary>, ClientError> {
        let envelope = self.request_envelope("/library/sections", &[]).await?;
        envelope
            .media_container
            .directory
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(|e| ClientError::Parse(e.to_string())))
            .collect()
    }

    fn type_code(kind: &str) -> &'static str {
        match kind {
            "episode" => "4",
            _ => "1",
        }
    }

    /// Lazily iterate items in a library, following server-side pagination
    /// until either `limit` items have been yielded or the server reports
    /// the window is exhausted. When `since_epoch` is set, items are
    /// additionally filtered client-side as a safety net against servers
    /// that ignore the sort hint.
    pub fn iter_items(
        &self,
        library_key: String,
        kind: String,
        limit: Option<u64>,
        since_epoch: Option<i64>,
    ) -> impl Stream<Item = Result<serde_json::Value, ClientError>> + '_ {
        try_stream! {
            let plex_type = Self::type_code(&kind).to_string();
            let page_size = DEFAULT_PAGE_SIZE;
            let mut offset: u32 = 0;
            let mut yielded: u64 = 0;

            loop {
                let mut params = vec![
                    ("type".to_string(), plex_type.clone()),
                    ("X-Plex-Container-Start".to_string(), offset.to_string()),
                    ("X-Plex-Container-Size".to_string(), page_size.to_string()),
                ];
                if since_epoch.is_some() {
                    params.push(("sort".to_string(), "updatedAt:desc".to_string()));
                }
                let params: Vec<(&str, String)> =
                    params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

                let envelope = self
                    .request_envelope(&format!("/library/sections/{library_key}/all"), &params)
                    .await?;

                let items = envelope.media_container.metadata;
                if items.is_empty() {
                    break;
                }
                let total_size = envelope.media_container.total_size;
                let page_len = items.len() as u32;

                for item in items {
                    if let Some(since) = since_epoch {
                        let updated_at = item.get("updatedAt").and_then(|v| v.as_i64());
                        if let Some(updated_at) = updated_at {
                            if updated_at < since {
                                continue;
                            }
                        }
                    }

                    yield item;
                    yielded += 1;
                    if let Some(limit) = limit {
                        if yielded >= limit {
                            return;
                        }
                    }
                }

                offset += page_len;
                if i64::from(offset) >= total_size || page_len == 0 {
                    break;
                }
            }
        }
    }

    pub async fn get_item_details(&self, rating_key: &str) -> Result<serde_json::Value, ClientError> {
        let mut envelope = self
            .request_envelope(&format!("/library/metadata/{rating_key}"), &[])
            .await?;
        envelope
            .media_container
            .metadata
            .pop()
            .ok_or(ClientError::NotFound)
    }

    pub async fn get_show_children(
        &self,
        show_rating_key: &str,
    ) -> Result<Vec<serde_json::Value>, ClientError> {
        let envelope = self
            .request_envelope(&format!("/library/metadata/{show_rating_key}/children"), &[])
            .await?;
        Ok(envelope.media_container.metadata)
    }

    pub async fn get_season_children(
        &self,
        season_rating_key: &str,
    ) -> Result<Vec<serde_json::Value>, ClientError> {
        let envelope = self
            .request_envelope(&format!("/library/metadata/{season_rating_key}/children"), &[])
            .await?;
        Ok(envelope.media_container.metadata)
    }

    pub async fn test_connection(&self) -> bool {
        self.request_envelope("/status/sessions", &[]).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_code_maps_episode_and_defaults_to_movie() {
        assert_eq!(PlexClient::type_code("episode"), "4");
        assert_eq!(PlexClient::type_code("movie"), "1");
        assert_eq!(PlexClient::type_code("unknown"), "1");
    }

    #[test]
    fn url_joins_base_and_path_regardless_of_slashes() {
        let client = PlexClient::new(ClientConfig {
            base_url: "http://host:32400/".to_string(),
            token: "tok".to_string(),
            request_timeout: Duration::from_secs(20),
        })
        .unwrap();
        assert_eq!(
            client.url("/library/sections"),
            "http://host:32400/library/sections"
        );
    }
}
