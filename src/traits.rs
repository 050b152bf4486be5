use std::path::Path;

use async_trait::async_trait;
use image::{DynamicImage, ImageReader};
use ndarray::prelude::*;

use crate::errors::{Result, SegError};
use crate::job::{JobArtifacts, JobId, NewJob};
use crate::model::{argmax_classes, preprocess, Segmentation};
use crate::render::{self, Palette, OVERLAY_ALPHA};

/// A semantic segmentation network.
///
/// Implementors only provide the forward pass and their metadata; decoding,
/// preprocessing, arg-max and rendering are shared so every model produces
/// masks the same way.
pub trait SegmentationModel: Send + Sync {
    fn name(&self) -> &str;

    /// `(width, height)` of the network input.
    fn input_size(&self) -> (u32, u32);

    fn num_classes(&self) -> usize;

    fn palette(&self) -> &Palette;

    /// Raw class logits `[1, C, H, W]` for a normalized NCHW tensor.
    fn forward(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>>;

    fn segment_image(&self, img: &DynamicImage) -> Result<Segmentation> {
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();

        let tensor = preprocess(&rgb, self.input_size());
        let logits = self.forward(tensor.view())?;
        let class_mask = argmax_classes(logits.view())?;

        let color_mask = render::colorize(class_mask.view(), self.palette());
        let color_mask = render::resize_nearest(&color_mask, width, height);
        let overlay = render::blend(&rgb, &color_mask, OVERLAY_ALPHA)?;

        Ok(Segmentation {
            class_mask,
            color_mask,
            overlay,
        })
    }

    /// Decodes the file at `image_path` and segments it. The format is sniffed
    /// from the content, not the extension.
    fn predict(&self, image_path: &Path) -> Result<Segmentation> {
        let image_err = |operation: &str, source: Box<dyn std::error::Error + Send + Sync>| {
            SegError::ImageProcessing {
                path: image_path.display().to_string(),
                operation: operation.to_string(),
                source,
            }
        };

        let img = ImageReader::open(image_path)
            .map_err(|e| image_err("open image", Box::new(e)))?
            .with_guessed_format()
            .map_err(|e| image_err("detect image format", Box::new(e)))?
            .decode()
            .map_err(|e| image_err("decode image", Box::new(e)))?;

        self.segment_image(&img)
    }
}

/// Job lifecycle persistence.
///
/// Each call is one unit of work: it either takes full effect or none.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Records an accepted upload with status `processing`.
    async fn create_job(&self, new_job: &NewJob) -> Result<JobId>;

    /// Moves a `processing` job to `completed` with its artifacts.
    async fn complete_job(&self, job_id: JobId, artifacts: &JobArtifacts) -> Result<()>;

    /// Moves a `processing` job to `failed`.
    async fn fail_job(&self, job_id: JobId, reason: &str) -> Result<()>;
}
