use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::http::{client_with_timeout, ensure_success, ExternalError};

/// Turns photo bytes into a short caption.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, photo: &[u8]) -> Result<String, ExternalError>;
}

/// Client for a HuggingFace image-to-text inference endpoint.
pub struct HuggingFaceCaptioner {
    http: Client,
    url: String,
    api_token: String,
}

/// The inference API answers with either a single object or a list of candidates.
#[derive(Deserialize)]
#[serde(untagged)]
enum CaptionResponse {
    Single { generated_caption: String },
    Candidates(Vec<CaptionCandidate>),
}

#[derive(Deserialize)]
struct CaptionCandidate {
    generated_text: String,
}

impl HuggingFaceCaptioner {
    pub fn new(url: &str, api_token: &str, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            http: client_with_timeout(timeout)?,
            url: url.to_string(),
            api_token: api_token.to_string(),
        })
    }
}

#[async_trait]
impl Captioner for HuggingFaceCaptioner {
    async fn caption(&self, photo: &[u8]) -> Result<String, ExternalError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_token)
            .body(photo.to_vec())
            .send()
            .await?;

        let body = ensure_success("captioning", response).await?.bytes().await?;
        let caption = match serde_json::from_slice::<CaptionResponse>(&body)? {
            CaptionResponse::Single { generated_caption } => generated_caption,
            CaptionResponse::Candidates(candidates) => candidates
                .into_iter()
                .next()
                .map(|c| c.generated_text)
                .unwrap_or_default(),
        };

        let caption = caption.trim();
        if caption.is_empty() {
            return Err(ExternalError::Empty("captioning"));
        }
        Ok(caption.to_string())
    }
}
