use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Payload pushed from ingestion to captioning: "this photo is ready to caption".
///
/// The photo travels base64-encoded when the deployment embeds it; otherwise the
/// captioner reads it back from the object store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptionMessage {
    pub request_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

impl CaptionMessage {
    pub fn new(request_id: i64, photo: Option<&[u8]>) -> Self {
        Self {
            request_id,
            photo: photo.map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes)),
        }
    }

    pub fn encode(&self) -> Result<String, PipelineError> {
        serde_json::to_string(self).map_err(|e| PipelineError::MalformedMessage(e.to_string()))
    }

    /// Parse a raw queue payload, rejecting anything without a usable id.
    pub fn decode(payload: &str) -> Result<Self, PipelineError> {
        let message: Self = serde_json::from_str(payload)
            .map_err(|e| PipelineError::MalformedMessage(e.to_string()))?;

        if message.request_id <= 0 {
            return Err(PipelineError::MalformedMessage(format!(
                "invalid request id {}",
                message.request_id
            )));
        }

        Ok(message)
    }

    /// Embedded photo bytes, if the message carries them.
    pub fn photo_bytes(&self) -> Result<Option<Vec<u8>>, PipelineError> {
        self.photo
            .as_deref()
            .map(|encoded| {
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| PipelineError::MalformedMessage(format!("photo: {e}")))
            })
            .transpose()
    }
}
