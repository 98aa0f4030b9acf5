//! Backend client adapters, one per generation engine.
//!
//! Each adapter owns the translation from a [`GenerationInput`] into the
//! graph-shaped payload its engine expects, plus the timing profile and
//! result-extraction rule the completion tracker should use for it.
//! Adapters hold no task state; the lifecycle manager owns that.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::comfy::{ArtifactRef, ComfyClient};
use crate::error::EngineError;
use crate::tracker::ProgressSink;

pub mod diffusion;
pub mod motion;
pub mod transformer;

pub use diffusion::DiffusionEngine;
pub use motion::MotionTransferEngine;
pub use transformer::TransformerEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationMode {
    #[serde(rename = "i2v")]
    ImageToVideo,
    #[serde(rename = "t2v")]
    TextToVideo,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::ImageToVideo => "i2v",
            GenerationMode::TextToVideo => "t2v",
        }
    }
}

/// Normalized generation request as the lifecycle manager hands it to an
/// adapter. Validation of required fields happens before submission, but
/// adapters re-check what their graph cannot do without.
#[derive(Debug, Clone)]
pub struct GenerationInput {
    pub mode: GenerationMode,
    pub prompt: Option<String>,
    /// Local path of a previously uploaded source image (i2v only).
    pub image_path: Option<PathBuf>,
    /// Named camera-motion style for the motion-transfer engine.
    pub motion_style: Option<String>,
    /// Motion conditioning strength for the diffusion engine.
    pub motion_strength: Option<u32>,
}

impl GenerationInput {
    pub fn prompt_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.prompt.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => p,
            _ => default,
        }
    }

    fn require_image(&self) -> Result<&PathBuf, EngineError> {
        self.image_path
            .as_ref()
            .ok_or_else(|| EngineError::Validation("a source image is required".to_string()))
    }

    fn require_prompt(&self) -> Result<&str, EngineError> {
        match self.prompt.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => Ok(p),
            _ => Err(EngineError::Validation(
                "a non-empty prompt is required".to_string(),
            )),
        }
    }
}

/// Correlation between a queued workflow and its eventual output.
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub prompt_id: String,
    pub client_id: String,
}

#[async_trait]
pub trait GenerationEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, mode: GenerationMode) -> bool;

    /// Build the engine's workflow graph from the input and queue it.
    /// Fails with [`EngineError::Validation`] when the input lacks what the
    /// graph needs, or [`EngineError::Submission`] when the backend rejects
    /// it.
    async fn submit(&self, input: &GenerationInput) -> Result<SubmittedJob, EngineError>;

    /// Monitor the job until it yields an artifact or fails terminally.
    async fn await_result(
        &self,
        job: &SubmittedJob,
        on_progress: ProgressSink<'_>,
    ) -> Result<ArtifactRef, EngineError>;
}

/// The configured set of engines, keyed by public engine name.
pub struct EngineSet {
    engines: HashMap<&'static str, Arc<dyn GenerationEngine>>,
}

impl EngineSet {
    pub fn empty() -> Self {
        Self {
            engines: HashMap::new(),
        }
    }

    /// All three production engines against one backend instance.
    pub fn standard(client: ComfyClient) -> Self {
        let mut set = Self::empty();
        set.register(Arc::new(MotionTransferEngine::new(client.clone())));
        set.register(Arc::new(DiffusionEngine::new(client.clone())));
        set.register(Arc::new(TransformerEngine::new(client)));
        set
    }

    pub fn register(&mut self, engine: Arc<dyn GenerationEngine>) {
        self.engines.insert(engine.name(), engine);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerationEngine>> {
        self.engines.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.engines.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Fresh sampler seed per workflow build so reruns never collide.
pub(crate) fn fresh_seed() -> u64 {
    rand::thread_rng().gen_range(0..1_000_000_000)
}

/// Per-submission correlation id for the push channel.
pub(crate) fn fresh_client_id() -> String {
    Uuid::new_v4().simple().to_string()
}
