use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::http::{client_with_timeout, ensure_success, ExternalError};

/// Produces a new image from a caption.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, caption: &str) -> Result<Vec<u8>, ExternalError>;
}

/// Client for a HuggingFace text-to-image inference endpoint.
pub struct HuggingFaceGenerator {
    http: Client,
    url: String,
    api_token: String,
}

impl HuggingFaceGenerator {
    pub fn new(url: &str, api_token: &str, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            http: client_with_timeout(timeout)?,
            url: url.to_string(),
            api_token: api_token.to_string(),
        })
    }
}

#[async_trait]
impl ImageGenerator for HuggingFaceGenerator {
    async fn generate(&self, caption: &str) -> Result<Vec<u8>, ExternalError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({ "inputs": caption }))
            .send()
            .await?;

        let image = ensure_success("generation", response).await?.bytes().await?;
        if image.is_empty() {
            return Err(ExternalError::Empty("generation"));
        }
        Ok(image.to_vec())
    }
}
