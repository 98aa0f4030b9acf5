//! Diffusion image-to-video engine (stable video diffusion).
//!
//! The source image is uploaded to the backend's input store first, then
//! referenced by name from the conditioning graph. Motion intensity maps
//! to the conditioning bucket; everything else is fixed.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{fresh_client_id, fresh_seed, GenerationEngine, GenerationInput, GenerationMode, SubmittedJob};
use crate::comfy::{ArtifactRef, ComfyClient, ExtractionRule};
use crate::error::EngineError;
use crate::tracker::{await_artifact, ProgressSink, TrackerConfig};

pub const ENGINE_NAME: &str = "svd";

pub const MOTION_BUCKET_RANGE: (u32, u32) = (1, 255);
pub const DEFAULT_MOTION_BUCKET: u32 = 127;

/// Conditioning and sampler constants for the img2vid graph.
#[derive(Debug, Clone)]
pub struct DiffusionWorkflowParams {
    pub checkpoint: &'static str,
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub frame_rate: u32,
    pub augmentation_level: f64,
    pub min_cfg: f64,
    pub steps: u32,
    pub cfg: f64,
}

impl Default for DiffusionWorkflowParams {
    fn default() -> Self {
        Self {
            checkpoint: "SVD/svd_xt.safetensors",
            width: 1024,
            height: 576,
            frames: 25,
            frame_rate: 6,
            augmentation_level: 0.0,
            min_cfg: 1.0,
            steps: 20,
            cfg: 2.5,
        }
    }
}

/// Clamp a requested conditioning strength into the model's valid bucket
/// range.
pub fn clamp_motion_bucket(requested: Option<u32>) -> u32 {
    requested
        .unwrap_or(DEFAULT_MOTION_BUCKET)
        .clamp(MOTION_BUCKET_RANGE.0, MOTION_BUCKET_RANGE.1)
}

pub fn clamp_frame_rate(requested: u32) -> u32 {
    requested.clamp(1, 30)
}

/// Pure mapping from parameters to the backend graph.
pub fn build_workflow(
    uploaded_image: &str,
    motion_bucket: u32,
    params: &DiffusionWorkflowParams,
    seed: u64,
    filename_prefix: &str,
) -> Value {
    let fps = clamp_frame_rate(params.frame_rate);

    json!({
        "1": {
            "inputs": { "image": uploaded_image, "upload": "image" },
            "class_type": "LoadImage"
        },
        "2": {
            "inputs": { "ckpt_name": params.checkpoint },
            "class_type": "ImageOnlyCheckpointLoader"
        },
        "3": {
            "inputs": {
                "width": params.width,
                "height": params.height,
                "video_frames": params.frames,
                "motion_bucket_id": motion_bucket,
                "fps": fps,
                "augmentation_level": params.augmentation_level,
                "clip_vision": ["2", 1],
                "init_image": ["4", 0],
                "vae": ["2", 2]
            },
            "class_type": "SVD_img2vid_Conditioning"
        },
        "4": {
            "inputs": {
                "width": params.width,
                "height": params.height,
                "interpolation": "lanczos",
                "method": "stretch",
                "condition": "always",
                "multiple_of": 64,
                "image": ["1", 0]
            },
            "class_type": "ImageResize+"
        },
        "5": {
            "inputs": { "min_cfg": params.min_cfg, "model": ["2", 0] },
            "class_type": "VideoLinearCFGGuidance"
        },
        "6": {
            "inputs": {
                "seed": seed,
                "steps": params.steps,
                "cfg": params.cfg,
                "sampler_name": "euler",
                "scheduler": "karras",
                "denoise": 1.0,
                "model": ["5", 0],
                "positive": ["3", 0],
                "negative": ["3", 1],
                "latent_image": ["3", 2]
            },
            "class_type": "KSampler"
        },
        "7": {
            "inputs": { "samples": ["6", 0], "vae": ["2", 2] },
            "class_type": "VAEDecode"
        },
        "8": {
            "inputs": {
                "images": ["7", 0],
                "frame_rate": fps,
                "loop_count": 0,
                "filename_prefix": filename_prefix,
                "format": "video/h264-mp4",
                "pingpong": false,
                "save_output": true
            },
            "class_type": "VHS_VideoCombine"
        }
    })
}

pub struct DiffusionEngine {
    client: ComfyClient,
    params: DiffusionWorkflowParams,
    tracker: TrackerConfig,
}

impl DiffusionEngine {
    pub fn new(client: ComfyClient) -> Self {
        Self {
            client,
            params: DiffusionWorkflowParams::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

#[async_trait]
impl GenerationEngine for DiffusionEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn supports(&self, mode: GenerationMode) -> bool {
        mode == GenerationMode::ImageToVideo
    }

    async fn submit(&self, input: &GenerationInput) -> Result<SubmittedJob, EngineError> {
        let image_path = input.require_image()?;
        let image_bytes = tokio::fs::read(image_path).await.map_err(|e| {
            EngineError::Validation(format!(
                "source image unreadable: {}: {e}",
                image_path.display()
            ))
        })?;

        let original_name = image_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("source.jpg");
        let uploaded = self.client.upload_image(image_bytes, original_name).await?;

        let motion_bucket = clamp_motion_bucket(input.motion_strength);
        let prefix = format!("svd_video_{}", chrono::Utc::now().timestamp_millis());
        let workflow = build_workflow(&uploaded, motion_bucket, &self.params, fresh_seed(), &prefix);

        let client_id = fresh_client_id();
        let prompt_id = self.client.queue_prompt(workflow, &client_id).await?;
        info!(engine = ENGINE_NAME, prompt_id = %prompt_id, motion_bucket, "workflow queued");

        Ok(SubmittedJob {
            prompt_id,
            client_id,
        })
    }

    async fn await_result(
        &self,
        job: &SubmittedJob,
        on_progress: ProgressSink<'_>,
    ) -> Result<ArtifactRef, EngineError> {
        // Strict extraction: this graph always saves through the video
        // combine node, so frames alone mean something went wrong.
        await_artifact(
            &self.client,
            &job.client_id,
            &job.prompt_id,
            ExtractionRule::default(),
            &self.tracker,
            on_progress,
        )
        .await
    }
}
