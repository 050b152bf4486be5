use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{ImageFormat, RgbImage};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DataDirsConfig;
use crate::errors::{Result, SegError};
use crate::traits::SegmentationModel;

/// Artifacts written for one image.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub mask_path: PathBuf,
    pub overlay_path: PathBuf,
    pub inference_time: Duration,
    /// `(width, height)` of the class mask, i.e. the network input size.
    pub mask_size: (u32, u32),
}

impl ProcessedImage {
    pub fn inference_time_ms(&self) -> f64 {
        self.inference_time.as_secs_f64() * 1000.0
    }
}

/// Runs the model on stored uploads and writes the mask and overlay next to
/// them, at paths derived from the image id.
pub struct ImageProcessor {
    model: Arc<dyn SegmentationModel>,
    dirs: DataDirsConfig,
}

impl ImageProcessor {
    pub fn new(model: Arc<dyn SegmentationModel>, dirs: DataDirsConfig) -> Self {
        Self { model, dirs }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub const fn dirs(&self) -> &DataDirsConfig {
        &self.dirs
    }

    /// Segments the stored input of `image_id` on the blocking pool. Either
    /// both artifacts are written or neither is left behind.
    pub async fn process(&self, image_id: Uuid) -> Result<ProcessedImage> {
        let model = Arc::clone(&self.model);
        let input_path = self.dirs.input_image(&image_id);
        let mask_path = self.dirs.mask_image(&image_id);
        let overlay_path = self.dirs.overlay_image(&image_id);

        let processed = tokio::task::spawn_blocking(move || -> Result<ProcessedImage> {
            let started = Instant::now();
            let segmentation = model.predict(&input_path)?;
            let inference_time = started.elapsed();

            let (rows, cols) = segmentation.class_mask.dim();
            debug!(
                "Segmented {} in {:?} ({}x{} mask)",
                input_path.display(),
                inference_time,
                cols,
                rows
            );

            let written = save_png(&segmentation.color_mask, &mask_path)
                .and_then(|()| save_png(&segmentation.overlay, &overlay_path));
            if let Err(err) = written {
                remove_quietly(&mask_path);
                remove_quietly(&overlay_path);
                return Err(err);
            }

            Ok(ProcessedImage {
                mask_path,
                overlay_path,
                inference_time,
                mask_size: (cols as u32, rows as u32),
            })
        })
        .await
        .map_err(|e| SegError::model("inference task", e))??;

        Ok(processed)
    }

    /// Removes the outputs of `image_id` so they are no longer addressable.
    /// The stored input is kept.
    pub async fn discard_outputs(&self, image_id: Uuid) {
        for path in [
            self.dirs.mask_image(&image_id),
            self.dirs.overlay_image(&image_id),
        ] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

/// Writes next to `path` and renames into place, so readers of `path` only
/// ever see a complete PNG.
fn save_png(image: &RgbImage, path: &Path) -> Result<()> {
    let staging = staging_path(path);
    let saved = image
        .save_with_format(&staging, ImageFormat::Png)
        .map_err(|e| SegError::ImageProcessing {
            path: path.display().to_string(),
            operation: "save image".to_string(),
            source: Box::new(e),
        })
        .and_then(|()| {
            std::fs::rename(&staging, path)
                .map_err(|e| SegError::file_system(path, "publish image", e))
        });
    if saved.is_err() {
        remove_quietly(&staging);
    }
    saved
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
