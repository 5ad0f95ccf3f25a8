use reqwest::{Client, Response};
use std::time::Duration;

/// Build an HTTP client whose every request is bounded by `timeout`.
pub fn client_with_timeout(timeout: Duration) -> Result<Client, ExternalError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .map_err(ExternalError::Http)
}

/// Turn a non-success status into an error that keeps a bounded slice of the body.
pub async fn ensure_success(
    capability: &'static str,
    response: Response,
) -> Result<Response, ExternalError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > 512 {
        let mut cut = 512;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(ExternalError::Status {
        capability,
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{capability} responded with status {status}: {body}")]
    Status {
        capability: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0} returned an empty result")]
    Empty(&'static str),
}
