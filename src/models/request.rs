use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Lifecycle of a request as it moves through the three stages.
///
/// `pending -> ready -> completed`, or `ready -> failed`. Only `pending` and
/// `ready` have outgoing transitions.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Ready,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a record currently in `self` may be moved to `next`.
    ///
    /// `ready -> ready` is allowed so a repeated caption overwrites the first.
    pub fn accepts(self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Ready)
                | (Self::Ready, Self::Ready)
                | (Self::Ready, Self::Completed)
                | (Self::Ready, Self::Failed)
        )
    }
}

/// One end-to-end unit of work, as stored in the `requests` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: i64,
    pub email: String,
    pub status: RequestStatus,
    pub caption: String,
    pub result_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    /// True when moving this record to `target` (with `result_url` for
    /// completions) would not change anything observable.
    pub fn already_in(&self, target: RequestStatus, result_url: &str) -> bool {
        match target {
            RequestStatus::Completed => {
                self.status == RequestStatus::Completed && self.result_url == result_url
            }
            RequestStatus::Failed => self.status == RequestStatus::Failed,
            _ => false,
        }
    }
}
