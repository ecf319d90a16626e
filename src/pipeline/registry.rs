//! Opaque integer handles for pipelines owned by a host
//!
//! Hosts that cannot hold Rust values directly keep a [`PipelineId`] and route
//! every call through a [`Registry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::processor::{Pipeline, SubmitOutcome};
use crate::error::{PipelineError, Result};
use crate::process::ResultFrameType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(u64);

impl PipelineId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline-{}", self.0)
    }
}

pub struct Registry {
    next_id: AtomicU64,
    pipelines: Mutex<HashMap<PipelineId, Arc<Pipeline>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    /// Take ownership of a pipeline and hand back its handle.
    pub fn insert(&self, pipeline: Pipeline) -> PipelineId {
        let id = PipelineId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pipelines.lock().insert(id, Arc::new(pipeline));
        info!(%id, "Pipeline registered");
        id
    }

    pub fn get(&self, id: PipelineId) -> Result<Arc<Pipeline>> {
        self.pipelines
            .lock()
            .get(&id)
            .cloned()
            .ok_or(PipelineError::UnknownPipeline(id.0))
    }

    /// Stop and forget a pipeline.
    ///
    /// The pipeline is stopped outside the registry lock so a slow join does
    /// not block calls for other handles.
    pub fn release(&self, id: PipelineId) -> Result<()> {
        let pipeline = self
            .pipelines
            .lock()
            .remove(&id)
            .ok_or(PipelineError::UnknownPipeline(id.0))?;
        pipeline.stop();
        info!(%id, "Pipeline released");
        Ok(())
    }

    pub fn start(&self, id: PipelineId, width: u32, height: u32) -> Result<()> {
        self.get(id)?.start(width, height)
    }

    pub fn stop(&self, id: PipelineId) -> Result<()> {
        self.get(id)?.stop();
        Ok(())
    }

    pub fn submit_capture_cycle(&self, id: PipelineId) -> Result<SubmitOutcome> {
        Ok(self.get(id)?.submit_capture_cycle())
    }

    pub fn set_parameter(&self, id: PipelineId, value: i32) -> Result<()> {
        self.get(id)?.set_parameter(value);
        Ok(())
    }

    pub fn parameter(&self, id: PipelineId) -> Result<ResultFrameType> {
        Ok(self.get(id)?.parameter())
    }

    pub fn len(&self) -> usize {
        self.pipelines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
