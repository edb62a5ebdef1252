//! Upload proxy to the content storage network.
//!
//! Creator uploads go through the gate so the storage API key never reaches
//! the browser. The client streams the file as multipart form data and
//! returns the content identifier the network assigned.

use serde::Deserialize;
use tracing::instrument;
use url::Url;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("storage service unavailable: {0}")]
    Upstream(String),
    #[error("storage service rejected upload: {0}")]
    Rejected(String),
}

/// Response shape of the storage network's upload endpoint.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Debug, Clone)]
pub struct StorageClient {
    http: reqwest::Client,
    upload_url: Url,
    api_key: String,
}

impl StorageClient {
    pub fn new(upload_url: Url, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            upload_url,
            api_key,
        }
    }

    /// The server-held upload key. Released only to registered creators,
    /// see the key release endpoint.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Uploads one file and returns its content identifier.
    #[instrument(skip_all, fields(otel.kind = "client", file_name = %file_name, bytes = data.len()))]
    pub async fn upload(&self, file_name: String, data: Vec<u8>) -> Result<String, StorageError> {
        let part = reqwest::multipart::Part::bytes(data).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.upload_url.clone())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::Rejected(format!(
                "status {}",
                response.status()
            )));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Upstream(e.to_string()))?;
        Ok(body.hash)
    }
}
