use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use ndarray::prelude::*;
use parking_lot::Mutex;

use crate::errors::{Result, SegError};
use crate::job::{Job, JobArtifacts, JobId, NewJob};
use crate::render::{Palette, PALETTE_SEED};
use crate::traits::{JobStore, SegmentationModel};

/// Segmentation model for tests: buckets each pixel by brightness into one of
/// `num_classes` classes. Deterministic, no ONNX file needed.
#[derive(Debug, Clone)]
pub struct MockSegmentationModel {
    input_size: (u32, u32),
    num_classes: usize,
    palette: Palette,
}

impl MockSegmentationModel {
    pub fn new(input_size: (u32, u32), num_classes: usize) -> Self {
        Self {
            input_size,
            num_classes,
            palette: Palette::seeded(num_classes, PALETTE_SEED),
        }
    }
}

impl Default for MockSegmentationModel {
    fn default() -> Self {
        Self::new((512, 512), 21)
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn name(&self) -> &str {
        "mock_segmentation"
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
        let (batch, _, height, width) = tensor.dim();
        let classes = self.num_classes;
        let mut logits = Array4::<f32>::zeros((batch, classes, height, width));

        // normalized values sit roughly in [-2.2, 2.7]
        let brightness = tensor.mean_axis(Axis(1)).ok_or_else(|| {
            SegError::model("mock forward", "input tensor has no channels".to_string())
        })?;
        for ((b, y, x), &value) in brightness.indexed_iter() {
            let scaled = ((value + 2.2) / 4.9 * classes as f32).floor();
            let class = (scaled.max(0.0) as usize).min(classes - 1);
            logits[[b, class, y, x]] = 1.0;
        }
        Ok(logits)
    }
}

/// Which store operation an [`InMemoryJobStore`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Create,
    Complete,
}

/// [`JobStore`] kept in a map, with optional injected failures.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    next_id: AtomicI64,
    fail_on: Option<FailOn>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(fail_on: FailOn) -> Self {
        Self {
            fail_on: Some(fail_on),
            ..Self::default()
        }
    }

    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<_> = self.jobs.lock().values().cloned().collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    fn injected(&self, op: FailOn) -> Result<()> {
        if self.fail_on == Some(op) {
            return Err(SegError::database(
                "injected failure",
                sqlx::Error::PoolTimedOut,
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, new_job: &NewJob) -> Result<JobId> {
        self.injected(FailOn::Create)?;
        let job_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.jobs.lock().insert(job_id, Job::new(job_id, new_job));
        Ok(job_id)
    }

    async fn complete_job(&self, job_id: JobId, artifacts: &JobArtifacts) -> Result<()> {
        self.injected(FailOn::Complete)?;
        match self.jobs.lock().get_mut(&job_id).map(|job| job.complete(artifacts)) {
            Some(true) => Ok(()),
            _ => Err(SegError::JobNotFound { job_id }),
        }
    }

    async fn fail_job(&self, job_id: JobId, reason: &str) -> Result<()> {
        match self.jobs.lock().get_mut(&job_id).map(|job| job.fail(reason)) {
            Some(true) => Ok(()),
            _ => Err(SegError::JobNotFound { job_id }),
        }
    }
}
