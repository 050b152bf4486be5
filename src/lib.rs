pub mod api;
pub mod config;
pub mod database;
pub mod errors;
pub mod image_processor;
pub mod job;
pub mod model;
pub mod render;
pub mod traits;

pub mod mocks;

pub use config::{Cli, Config};
pub use database::PgJobStore;
pub use errors::{Result, SegError};
pub use image_processor::{ImageProcessor, ProcessedImage};
pub use job::{Job, JobArtifacts, JobId, JobStatus, NewJob};
pub use model::{Model, Segmentation};
pub use traits::*;
