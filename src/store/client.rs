//! REST client for the record store

use reqwest::Client;
use serde::Serialize;

/// Writes records to `{base_url}/{collection}` with an optional API key
#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl StorageClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{}", self.base_url, collection)
    }

    /// POST one record
    pub async fn insert<T: Serialize>(&self, collection: &str, data: &T) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(self.collection_url(collection))
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key));
        }

        let response = request.json(data).send().await.map_err(SinkError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Record sink errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Store API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Record channel full")]
    Full,

    #[error("Record channel closed")]
    Closed,
}
