use std::path::Path;

use axum::{
    body::Body,
    extract::{multipart::Field, Multipart, Path as UrlPath, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::errors::ApiError;
use super::response::{SegmentResponse, StatusResponse};
use super::AppState;
use crate::errors::SegError;
use crate::job::{JobArtifacts, JobId, NewJob};
use crate::traits::JobStore;

/// GET /
pub async fn root() -> Json<StatusResponse> {
    Json(StatusResponse::new("Cloud Segmentation API running"))
}

/// GET /api
pub async fn health() -> Json<StatusResponse> {
    Json(StatusResponse::new("API running"))
}

/// POST /api/segment - Segment an uploaded image
///
/// Expects a multipart form with a `file` field whose content type is
/// `image/*`. The upload is stored under a fresh id, segmented, and the mask
/// and overlay are written next to it.
///
/// # Errors
/// - 400 Bad Request: no `file` field, non-image content type, empty upload
/// - 413 Payload Too Large: upload exceeds `api.max_upload_mb`
/// - 500 Internal Server Error: decoding, inference, storage or job store failure
pub async fn segment(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SegmentResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        if !content_type.starts_with("image/") {
            return Err(ApiError::BadRequest("File must be an image".to_string()));
        }

        let image_id = Uuid::new_v4();
        let input_path = state.processor.dirs().input_image(&image_id);
        let size = store_upload(field, &input_path).await?;
        debug!(
            "Stored upload {} ({}, {} bytes) at {}",
            image_id,
            content_type,
            size,
            input_path.display()
        );

        return run_segmentation(&state, image_id, &input_path)
            .await
            .map(Json);
    }

    Err(ApiError::BadRequest("No file uploaded".to_string()))
}

/// GET /api/mask/:image_id - Stream the color mask PNG
pub async fn get_mask(
    State(state): State<AppState>,
    UrlPath(image_id): UrlPath<String>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::NotFound("Mask not found".to_string());

    // anything that is not a uuid cannot name a stored artifact
    let image_id = Uuid::parse_str(&image_id).map_err(|_| not_found())?;
    let path = state.processor.dirs().mask_image(&image_id);

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(SegError::file_system(&path, "open mask", e).into()),
    };

    let body = Body::from_stream(ReaderStream::new(file));
    Ok(([(header::CONTENT_TYPE, "image/png")], body).into_response())
}

async fn run_segmentation(
    state: &AppState,
    image_id: Uuid,
    input_path: &Path,
) -> Result<SegmentResponse, ApiError> {
    let model_name = state.processor.model_name().to_string();
    let input_image = input_path.display().to_string();

    let job = match &state.jobs {
        Some(jobs) => {
            let new_job = NewJob {
                image_id,
                image_url: input_image.clone(),
                model_name: model_name.clone(),
            };
            Some((jobs.as_ref(), jobs.create_job(&new_job).await?))
        }
        None => None,
    };

    let processed = match state.processor.process(image_id).await {
        Ok(processed) => processed,
        Err(err) => {
            if let Some((jobs, job_id)) = job {
                mark_failed(jobs, job_id, &err).await;
            }
            return Err(err.into());
        }
    };

    if let Some((jobs, job_id)) = job {
        let artifacts = JobArtifacts {
            mask_url: processed.mask_path.display().to_string(),
            overlay_url: processed.overlay_path.display().to_string(),
            inference_time_ms: processed.inference_time_ms(),
        };
        if let Err(err) = jobs.complete_job(job_id, &artifacts).await {
            state.processor.discard_outputs(image_id).await;
            mark_failed(jobs, job_id, &err).await;
            return Err(err.into());
        }
    }

    info!(
        "Segmented {} with {} in {:.1}ms",
        image_id,
        model_name,
        processed.inference_time_ms()
    );

    Ok(SegmentResponse::new(
        image_id,
        input_image,
        &model_name,
        &processed,
    ))
}

/// Best-effort: the original error is what the client sees.
async fn mark_failed(jobs: &dyn JobStore, job_id: JobId, err: &SegError) {
    if let Err(e) = jobs.fail_job(job_id, &err.to_string()).await {
        warn!("Could not mark job {} as failed: {}", job_id, e);
    }
}

/// Streams the field to `path` chunk by chunk. A partial file is removed when
/// the upload breaks off or turns out empty.
async fn store_upload(field: Field<'_>, path: &Path) -> Result<u64, ApiError> {
    let file = tokio::fs::File::create(path)
        .await
        .map_err(|e| SegError::file_system(path, "create upload", e))?;

    match write_chunks(field, file, path).await {
        Ok(0) => {
            remove_partial(path).await;
            Err(ApiError::BadRequest("Uploaded file is empty".to_string()))
        }
        Ok(written) => Ok(written),
        Err(err) => {
            remove_partial(path).await;
            Err(err)
        }
    }
}

async fn write_chunks(
    mut field: Field<'_>,
    mut file: tokio::fs::File,
    path: &Path,
) -> Result<u64, ApiError> {
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk)
            .await
            .map_err(|e| SegError::file_system(path, "write upload", e))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| SegError::file_system(path, "flush upload", e))?;
    Ok(written)
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove partial upload {}: {}", path.display(), e);
    }
}
