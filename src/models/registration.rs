use garde::Validate;
use serde::{Deserialize, Serialize};

use super::request::{Request, RequestStatus};

/// Metadata portion of an upload.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[garde(email, length(max = 255))]
    pub email: String,
}

/// Response after an upload has been accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub id: i64,
    pub status: RequestStatus,
}

/// Response for querying request status.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestStatusResponse {
    pub id: i64,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
}

impl From<Request> for RequestStatusResponse {
    fn from(request: Request) -> Self {
        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };
        Self {
            id: request.id,
            status: request.status,
            caption: non_empty(request.caption),
            result_url: non_empty(request.result_url),
        }
    }
}
