use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::image_processor::ProcessedImage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

/// Descriptor returned by `POST /api/segment`. Paths are the server-side
/// locations of the stored artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentResponse {
    pub image_id: Uuid,
    pub input_image: String,
    pub mask_image: String,
    pub overlay_image: String,
    pub model_name: String,
    pub inference_time_ms: f64,
}

impl SegmentResponse {
    pub fn new(
        image_id: Uuid,
        input_image: String,
        model_name: &str,
        processed: &ProcessedImage,
    ) -> Self {
        Self {
            image_id,
            input_image,
            mask_image: processed.mask_path.display().to_string(),
            overlay_image: processed.overlay_path.display().to_string(),
            model_name: model_name.to_string(),
            inference_time_ms: processed.inference_time_ms(),
        }
    }
}
