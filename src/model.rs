use std::path::Path;

use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch},
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{Device, ModelConfig};
use crate::errors::{Result, SegError};
use crate::render::{Palette, PALETTE_SEED};
use crate::traits::SegmentationModel;

/// ImageNet statistics the torchvision backbones were trained with.
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Per-pixel class indices, shape `(height, width)`.
pub type ClassMask = Array2<u8>;

/// Output of one segmentation: the class mask at network resolution plus the
/// color mask and overlay at the resolution of the source image.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub class_mask: ClassMask,
    pub color_mask: RgbImage,
    pub overlay: RgbImage,
}

/// DeepLabV3 exported to ONNX, run through ONNX Runtime.
pub struct Model {
    name: String,
    input_size: (u32, u32),
    num_classes: usize,
    palette: Palette,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl Model {
    pub fn new(config: &ModelConfig, model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(SegError::Configuration {
                message: format!("model file not found at '{}'", model_path.display()),
            });
        }

        info!(
            "Loading {} from {} on {}",
            config.name,
            model_path.display(),
            config.device
        );

        let mut session = Session::builder()
            .map_err(|e| SegError::model("session builder", e))?
            .with_execution_providers([execution_provider(config.device)])
            .map_err(|e| SegError::model("execution provider", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| SegError::model("optimization level", e))?
            .commit_from_file(model_path)
            .map_err(|e| {
                SegError::model(
                    &format!("load model file: {}", model_path.display()),
                    e,
                )
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "input".to_string());

        // torchvision exports `out` and, with aux_loss, `aux`
        let output = session
            .outputs
            .iter()
            .find(|output| output.name == "out")
            .or_else(|| session.outputs.first());
        let output_name = output
            .map(|output| output.name.clone())
            .unwrap_or_else(|| "out".to_string());
        let num_classes = output
            .and_then(|output| output.output_type.tensor_shape())
            .and_then(|shape| shape.get(1).copied())
            .filter(|&classes| classes > 0)
            .map_or(config.num_classes, |classes| classes as usize);

        debug!(
            "Model tensors - input: {}, output: {}, classes: {}",
            input_name, output_name, num_classes
        );

        let input_size = config.input_dimensions();
        let (width, height) = input_size;

        // warm up
        let data = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        session
            .run(ort::inputs![
                input_name.as_str() => TensorRef::from_array_view(&data)
                    .map_err(|e| SegError::model("warm-up tensor", e))?
            ])
            .map_err(|e| SegError::model("warm-up run", e))?;

        info!("Model {} ready ({} classes)", config.name, num_classes);

        Ok(Self {
            name: config.name.clone(),
            input_size,
            num_classes,
            palette: Palette::seeded(num_classes, PALETTE_SEED),
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }
}

impl SegmentationModel for Model {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn palette(&self) -> &Palette {
        &self.palette
    }

    fn forward(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }
}

fn execution_provider(device: Device) -> ExecutionProviderDispatch {
    match device {
        Device::Cpu => CPUExecutionProvider::default().build(),
        Device::Cuda(device_id) => CUDAExecutionProvider::default()
            .with_device_id(device_id)
            .build()
            .error_on_failure(),
    }
}

/// Resize (bilinear) to `(width, height)`, scale to `[0, 1]`, normalize with
/// [`MEAN`]/[`STD`] and lay out as `[1, 3, height, width]`.
pub fn preprocess(image: &RgbImage, (width, height): (u32, u32)) -> Array4<f32> {
    let resized = if image.dimensions() == (width, height) {
        image.clone()
    } else {
        imageops::resize(image, width, height, FilterType::Triangle)
    };

    let mut tensor = resized.as_ndarray3().mapv(|v| f32::from(v) / 255.0);
    for (channel, mut plane) in tensor.axis_iter_mut(Axis(0)).enumerate() {
        plane.mapv_inplace(|v| (v - MEAN[channel]) / STD[channel]);
    }
    tensor.insert_axis(Axis(0))
}

/// Index of the highest logit per pixel for `[1, C, H, W]` logits.
pub fn argmax_classes(logits: ArrayView4<f32>) -> Result<ClassMask> {
    let (batch, classes, _, _) = logits.dim();
    if batch != 1 {
        return Err(SegError::model(
            "arg-max",
            format!("expected a single image in the batch, got {batch}"),
        ));
    }
    if classes == 0 || classes > 256 {
        return Err(SegError::model(
            "arg-max",
            format!("class axis must hold 1..=256 logits, got {classes}"),
        ));
    }

    let mask = logits.index_axis(Axis(0), 0).map_axis(Axis(0), |lane| {
        let mut best = 0;
        for (class, &value) in lane.iter().enumerate() {
            if value > lane[best] {
                best = class;
            }
        }
        best as u8
    });
    Ok(mask)
}
