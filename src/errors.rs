use std::path::PathBuf;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the segmentation service.
///
/// Each variant carries the context of its domain (configuration, filesystem,
/// image decoding, model execution, persistence) so the HTTP layer can pick a
/// status code without parsing messages. Boxed sources are `Send + Sync`
/// because errors travel across `.await` points in request handlers.
#[derive(Error, Debug)]
pub enum SegError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Database error: {operation} failed")]
    Database {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Job {job_id} not found or no longer processing")]
    JobNotFound { job_id: i64 },
}

pub type Result<T> = std::result::Result<T, SegError>;

impl SegError {
    pub(crate) fn file_system(
        path: impl Into<PathBuf>,
        operation: &str,
        source: std::io::Error,
    ) -> Self {
        Self::FileSystem {
            path: path.into(),
            operation: operation.to_string(),
            source,
        }
    }

    pub(crate) fn model(operation: &str, source: impl Into<BoxError>) -> Self {
        Self::Model {
            operation: operation.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn database(operation: &str, source: sqlx::Error) -> Self {
        Self::Database {
            operation: operation.to_string(),
            source,
        }
    }

    /// Whether the failure was caused by the caller's input rather than the service.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that knows the path and operation should build
/// `SegError::FileSystem` itself; this is the fallback for bare `?`.
impl From<std::io::Error> for SegError {
    fn from(err: std::io::Error) -> Self {
        Self::file_system("unknown", "unknown", err)
    }
}

impl From<image::ImageError> for SegError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for SegError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

/// Shape errors come out of tensor reshaping around inference, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for SegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::model("tensor shape conversion", err)
    }
}

impl From<sqlx::Error> for SegError {
    fn from(err: sqlx::Error) -> Self {
        Self::database("query", err)
    }
}
