use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, SegError};

/// Upper bound for `api.max_upload_mb`.
pub const MAX_UPLOAD_MB: usize = 4096;

/// Command line and environment overrides for the server binary.
#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "SEG_CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// Overrides `api.host`
    #[arg(long, env = "SEG_HOST")]
    pub host: Option<String>,

    /// Overrides `api.port`
    #[arg(short, long, env = "SEG_PORT")]
    pub port: Option<u16>,

    /// Enables job persistence when set
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false)]
    pub log_json: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub data_dirs: DataDirsConfig,
}

impl Config {
    /// Reads and validates the configuration file, then makes sure the data
    /// directories exist. Any failure here is fatal at startup.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SegError::Configuration {
                message: format!(
                    "configuration file not found at '{}'; ensure config.json is present \
                     in the application directory or pass --config",
                    path.display()
                ),
            },
            _ => SegError::file_system(path, "read configuration", e),
        })?;

        let config = Self::from_json(&raw).map_err(|e| SegError::Configuration {
            message: format!(
                "configuration file at '{}' is not valid: {}",
                path.display(),
                e
            ),
        })?;

        config.validate()?;
        config.data_dirs.ensure_exists()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn validate(&self) -> Result<()> {
        let [height, width] = self.model.input_size;
        if height == 0 || width == 0 {
            return Err(SegError::Validation {
                field: "model.input_size".to_string(),
                reason: format!("must be non-zero, got [{height}, {width}]"),
            });
        }
        if !(1..=256).contains(&self.model.num_classes) {
            return Err(SegError::Validation {
                field: "model.num_classes".to_string(),
                reason: format!("must be within 1..=256, got {}", self.model.num_classes),
            });
        }
        if self.api.port == 0 {
            return Err(SegError::Validation {
                field: "api.port".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        if !(1..=MAX_UPLOAD_MB).contains(&self.api.max_upload_mb) {
            return Err(SegError::Validation {
                field: "api.max_upload_mb".to_string(),
                reason: format!(
                    "must be within 1..={MAX_UPLOAD_MB}, got {}",
                    self.api.max_upload_mb
                ),
            });
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.api.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.api.port = port;
        }
    }

    /// ONNX file to load: `model.path` when set, else `<base_dir>/models/<name>.onnx`.
    pub fn model_path(&self) -> PathBuf {
        self.model.path.clone().unwrap_or_else(|| {
            self.data_dirs
                .base_dir
                .join("models")
                .join(format!("{}.onnx", self.model.name))
        })
    }
}

/// Compute device the ONNX session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(i32),
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|id| id.parse::<i32>().ok())
                .filter(|id| *id >= 0)
                .map(Self::Cuda)
                .ok_or_else(|| {
                    format!("unsupported device '{s}', expected `cpu`, `cuda` or `cuda:<id>`")
                }),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub device: Device,
    /// `[height, width]` the image is resized to before the forward pass.
    pub input_size: [u32; 2],
    pub path: Option<PathBuf>,
    pub num_classes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "deeplabv3_resnet50".to_string(),
            device: Device::Cpu,
            input_size: [512, 512],
            path: None,
            // PASCAL VOC classes, background included
            num_classes: 21,
        }
    }
}

impl ModelConfig {
    /// `(width, height)` in the order the `image` crate expects.
    pub const fn input_dimensions(&self) -> (u32, u32) {
        (self.input_size[1], self.input_size[0])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_mb: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_upload_mb: 20,
        }
    }
}

impl ApiConfig {
    /// Resolves `host` (an IP literal or a name such as `localhost`) to the
    /// first listen address.
    pub async fn socket_addr(&self) -> Result<SocketAddr> {
        let invalid = |reason: String| SegError::Validation {
            field: "api.host".to_string(),
            reason,
        };
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| invalid(format!("'{}' does not resolve: {e}", self.host)))?
            .next()
            .ok_or_else(|| invalid(format!("'{}' resolved to no address", self.host)))
    }

    pub const fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

/// Remote container names. Artifacts are kept on local disk; these are only
/// carried so existing configuration files keep loading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub azure_input_container: Option<String>,
    pub azure_output_container: Option<String>,
}

impl StorageConfig {
    pub const fn has_remote_containers(&self) -> bool {
        self.azure_input_container.is_some() || self.azure_output_container.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataDirsConfig {
    pub base_dir: PathBuf,
    pub input_images: PathBuf,
    pub output_masks: PathBuf,
    /// Falls back to `output_masks` when unset.
    pub output_overlays: Option<PathBuf>,
}

impl Default for DataDirsConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("../"),
            input_images: PathBuf::from("../data/input_images"),
            output_masks: PathBuf::from("../data/output_masks"),
            output_overlays: None,
        }
    }
}

impl DataDirsConfig {
    /// Data directories rooted at `root`, used by tests and local runs.
    pub fn under(root: &Path) -> Self {
        Self {
            base_dir: root.to_path_buf(),
            input_images: root.join("input_images"),
            output_masks: root.join("output_masks"),
            output_overlays: Some(root.join("output_overlays")),
        }
    }

    pub fn overlay_dir(&self) -> &Path {
        self.output_overlays.as_deref().unwrap_or(&self.output_masks)
    }

    pub fn ensure_exists(&self) -> Result<()> {
        for dir in [
            self.input_images.as_path(),
            self.output_masks.as_path(),
            self.overlay_dir(),
        ] {
            std::fs::create_dir_all(dir)
                .map_err(|e| SegError::file_system(dir, "create data directory", e))?;
        }
        Ok(())
    }

    pub fn input_image(&self, image_id: &Uuid) -> PathBuf {
        self.input_images.join(format!("{image_id}.jpg"))
    }

    pub fn mask_image(&self, image_id: &Uuid) -> PathBuf {
        self.output_masks.join(format!("{image_id}_mask.png"))
    }

    pub fn overlay_image(&self, image_id: &Uuid) -> PathBuf {
        self.overlay_dir().join(format!("{image_id}_overlay.png"))
    }
}
