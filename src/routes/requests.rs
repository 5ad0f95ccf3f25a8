use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::error::PipelineError;
use crate::models::registration::{RegisterRequest, RegisterResponse, RequestStatusResponse};
use crate::models::request::RequestStatus;
use crate::stages::ingestion::Upload;

/// POST /api/v1/requests: Upload a photo to be captioned and re-imagined.
///
/// Multipart fields: `email` (text) and `image` (file).
pub async fn register_request(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<RegisterResponse>), StatusCode> {
    let mut email: Option<String> = None;
    let mut photo: Option<(Vec<u8>, &'static str)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| e.status())? {
        match field.name() {
            Some("email") => {
                email = Some(field.text().await.map_err(|e| e.status())?);
            }
            Some("image") => {
                let data = field.bytes().await.map_err(|e| e.status())?;
                let format =
                    image::guess_format(&data).map_err(|_| StatusCode::UNSUPPORTED_MEDIA_TYPE)?;
                photo = Some((data.to_vec(), format.to_mime_type()));
            }
            _ => {}
        }
    }

    let metadata = RegisterRequest {
        email: email.ok_or(StatusCode::BAD_REQUEST)?.trim().to_string(),
    };
    metadata
        .validate()
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;
    let (photo, content_type) = photo.ok_or(StatusCode::BAD_REQUEST)?;

    let upload = Upload {
        email: metadata.email,
        photo,
        content_type: content_type.to_string(),
    };

    let id = state.ingestion.register(&upload).await.map_err(|e| {
        tracing::error!(error = %e, kind = e.kind(), "failed to register request");
        status_for(&e)
    })?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id,
            status: RequestStatus::Pending,
        }),
    ))
}

/// GET /api/v1/requests/{id}: Current status, and the result URL once completed.
pub async fn get_request_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RequestStatusResponse>, StatusCode> {
    let request = state.store.get(id).await.map_err(|e| {
        if !matches!(e, PipelineError::NotFound(_)) {
            tracing::error!(request_id = id, error = %e, "failed to load request");
        }
        status_for(&e)
    })?;

    Ok(Json(request.into()))
}

fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::InvalidTransition { .. } => StatusCode::CONFLICT,
        PipelineError::EmptyCaption(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::MalformedMessage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PipelineError::ExternalCallFailed(_) => StatusCode::BAD_GATEWAY,
        PipelineError::StoreUnavailable(_)
        | PipelineError::BlobUnavailable(_)
        | PipelineError::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
