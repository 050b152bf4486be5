use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use image::{GenericImageView, ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`

use cloud_seg_rs::{
    api::{create_app, AppState, ErrorResponse, SegmentResponse, StatusResponse},
    config::DataDirsConfig,
    mocks::{FailOn, InMemoryJobStore, MockSegmentationModel},
    ImageProcessor, JobStatus, JobStore,
};

const BOUNDARY: &str = "cloud-seg-test-boundary";
const MAX_UPLOAD: usize = 20 * 1024 * 1024;

fn test_app(root: &Path, jobs: Option<Arc<dyn JobStore>>, max_upload: usize) -> Router {
    let dirs = DataDirsConfig::under(root);
    dirs.ensure_exists().unwrap();
    let model = MockSegmentationModel::new((64, 64), 21);
    let state = AppState {
        processor: Arc::new(ImageProcessor::new(Arc::new(model), dirs)),
        jobs,
    };
    create_app(state, max_upload)
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn multipart_body(field: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"upload.png\"\r\n\
         Content-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn segment_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/segment")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn upload_png(app: Router, width: u32, height: u32) -> Response {
    let body = multipart_body("file", "image/png", &png_bytes(width, height));
    app.oneshot(segment_request(body)).await.unwrap()
}

fn file_count(dir: &Path) -> usize {
    fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn test_status_endpoints() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(temp_dir.path(), None, MAX_UPLOAD);

    for (uri, expected) in [
        ("/", "Cloud Segmentation API running"),
        ("/api", "API running"),
        ("/api/", "API running"),
    ] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "GET {uri}");

        let status: StatusResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(status.status, expected);
    }
}

#[tokio::test]
async fn test_segment_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let dirs = DataDirsConfig::under(temp_dir.path());
    let app = test_app(temp_dir.path(), None, MAX_UPLOAD);

    let response = upload_png(app, 300, 400).await;
    assert_eq!(response.status(), StatusCode::OK);

    let raw: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    for key in [
        "image_id",
        "input_image",
        "mask_image",
        "overlay_image",
        "model_name",
        "inference_time_ms",
    ] {
        assert!(raw.get(key).is_some(), "missing key {key}");
    }

    let segmented: SegmentResponse = serde_json::from_value(raw).unwrap();
    assert_eq!(segmented.model_name, "mock_segmentation");
    assert!(segmented.inference_time_ms > 0.0);

    let id = segmented.image_id;
    assert_eq!(segmented.input_image, dirs.input_image(&id).display().to_string());
    assert_eq!(segmented.mask_image, dirs.mask_image(&id).display().to_string());
    assert_eq!(
        segmented.overlay_image,
        dirs.overlay_image(&id).display().to_string()
    );
    assert_ne!(segmented.mask_image, segmented.overlay_image);

    assert!(dirs.input_image(&id).is_file());
    let mask = image::open(dirs.mask_image(&id)).unwrap();
    let overlay = image::open(dirs.overlay_image(&id)).unwrap();
    assert_eq!(mask.dimensions(), (300, 400));
    assert_eq!(overlay.dimensions(), (300, 400));
}

#[tokio::test]
async fn test_mask_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(temp_dir.path(), None, MAX_UPLOAD);

    let response = upload_png(app.clone(), 120, 80).await;
    assert_eq!(response.status(), StatusCode::OK);
    let segmented: SegmentResponse =
        serde_json::from_slice(&body_bytes(response).await).unwrap();

    let response = app
        .oneshot(get(&format!("/api/mask/{}", segmented.image_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );

    let bytes = body_bytes(response).await;
    assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
    let mask = image::load_from_memory(&bytes).unwrap();
    assert_eq!(mask.dimensions(), (120, 80));
}

#[tokio::test]
async fn test_non_image_upload_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let dirs = DataDirsConfig::under(temp_dir.path());
    let app = test_app(temp_dir.path(), None, MAX_UPLOAD);

    let body = multipart_body("file", "text/plain", b"just some text");
    let response = app.oneshot(segment_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(error.detail, "File must be an image");
    assert_eq!(file_count(&dirs.input_images), 0);
    assert_eq!(file_count(&dirs.output_masks), 0);
}

#[tokio::test]
async fn test_missing_file_field() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(temp_dir.path(), None, MAX_UPLOAD);

    let body = multipart_body("attachment", "image/png", &png_bytes(8, 8));
    let response = app.oneshot(segment_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(error.detail, "No file uploaded");
}

#[tokio::test]
async fn test_corrupt_image_is_server_error() {
    let temp_dir = TempDir::new().unwrap();
    let dirs = DataDirsConfig::under(temp_dir.path());
    let app = test_app(temp_dir.path(), None, MAX_UPLOAD);

    let body = multipart_body("file", "image/png", b"definitely not a png");
    let response = app.oneshot(segment_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(file_count(&dirs.output_masks), 0);
    assert_eq!(file_count(dirs.overlay_dir()), 0);
}

#[tokio::test]
async fn test_oversized_upload_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(temp_dir.path(), None, 1024);

    let body = multipart_body("file", "image/png", &vec![0u8; 64 * 1024]);
    let response = app.oneshot(segment_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_unknown_mask_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(temp_dir.path(), None, MAX_UPLOAD);

    for uri in [
        format!("/api/mask/{}", uuid::Uuid::new_v4()),
        "/api/mask/not-a-uuid".to_string(),
    ] {
        let response = app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "GET {uri}");
        assert_ne!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/png"
        );

        let error: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(error.detail, "Mask not found");
    }
}

#[tokio::test]
async fn test_job_recorded_as_completed() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::new());
    let app = test_app(
        temp_dir.path(),
        Some(Arc::clone(&store) as Arc<dyn JobStore>),
        MAX_UPLOAD,
    );

    let response = upload_png(app, 64, 64).await;
    assert_eq!(response.status(), StatusCode::OK);
    let segmented: SegmentResponse =
        serde_json::from_slice(&body_bytes(response).await).unwrap();

    let jobs = store.jobs();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.image_id, segmented.image_id);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.image_url, segmented.input_image);
    assert_eq!(job.mask_url.as_deref(), Some(segmented.mask_image.as_str()));
    assert_eq!(
        job.overlay_url.as_deref(),
        Some(segmented.overlay_image.as_str())
    );
    let recorded = job.inference_time_ms.unwrap();
    assert!((recorded - segmented.inference_time_ms).abs() < 1e-6);
}

#[tokio::test]
async fn test_failed_completion_discards_outputs() {
    let temp_dir = TempDir::new().unwrap();
    let dirs = DataDirsConfig::under(temp_dir.path());
    let store = Arc::new(InMemoryJobStore::failing_on(FailOn::Complete));
    let app = test_app(
        temp_dir.path(),
        Some(Arc::clone(&store) as Arc<dyn JobStore>),
        MAX_UPLOAD,
    );

    let response = upload_png(app.clone(), 64, 64).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let jobs = store.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(jobs[0].error_message.is_some());

    let image_id = jobs[0].image_id;
    assert!(dirs.input_image(&image_id).is_file());
    assert!(!dirs.mask_image(&image_id).exists());
    assert!(!dirs.overlay_image(&image_id).exists());

    let response = app
        .oneshot(get(&format!("/api/mask/{image_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_job_creation_skips_inference() {
    let temp_dir = TempDir::new().unwrap();
    let dirs = DataDirsConfig::under(temp_dir.path());
    let store = Arc::new(InMemoryJobStore::failing_on(FailOn::Create));
    let app = test_app(
        temp_dir.path(),
        Some(Arc::clone(&store) as Arc<dyn JobStore>),
        MAX_UPLOAD,
    );

    let response = upload_png(app, 64, 64).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(store.jobs().is_empty());
    assert_eq!(file_count(&dirs.input_images), 1);
    assert_eq!(file_count(&dirs.output_masks), 0);
}

#[tokio::test]
async fn test_inference_failure_marks_job_failed() {
    let temp_dir = TempDir::new().unwrap();
    let dirs = DataDirsConfig::under(temp_dir.path());
    let store = Arc::new(InMemoryJobStore::new());
    let app = test_app(
        temp_dir.path(),
        Some(Arc::clone(&store) as Arc<dyn JobStore>),
        MAX_UPLOAD,
    );

    let body = multipart_body("file", "image/png", b"definitely not a png");
    let response = app.oneshot(segment_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let jobs = store.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(jobs[0].error_message.is_some());
    assert!(jobs[0].mask_url.is_none());
    assert!(jobs[0].completed_at.is_some());

    let image_id = jobs[0].image_id;
    assert!(dirs.input_image(&image_id).is_file());
    assert!(!dirs.mask_image(&image_id).exists());
    assert!(!dirs.overlay_image(&image_id).exists());
}
