//! Motion-transfer image-to-video engine.
//!
//! Animates a still image by pushing it through a motion-module pipeline
//! with a camera-motion LoRA selected from the request. The source image
//! travels inline as base64; the run keeps denoise low so the original
//! frame survives.

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::info;

use super::{fresh_client_id, fresh_seed, GenerationEngine, GenerationInput, GenerationMode, SubmittedJob};
use crate::comfy::{ArtifactRef, ComfyClient, ExtractionRule};
use crate::error::EngineError;
use crate::tracker::{await_artifact, ProgressSink, TrackerConfig};

pub const ENGINE_NAME: &str = "animatediff";

const DEFAULT_PROMPT: &str = "high quality video, smooth motion, cinematic";
const NEGATIVE_PROMPT: &str = "blurry face, deformed face, distorted features, bad anatomy, \
     watermark, text, ugly, low quality, face deformation, warped face, inconsistent face";

/// Camera-motion styles the LoRA library covers.
const MOTION_STYLES: [(&str, &str); 8] = [
    ("zoom-in", "ZoomIn"),
    ("zoom-out", "ZoomOut"),
    ("pan-left", "PanLeft"),
    ("pan-right", "PanRight"),
    ("pan-up", "TiltUp"),
    ("pan-down", "TiltDown"),
    ("roll-clockwise", "RollingClockwise"),
    ("roll-anticlockwise", "RollingAnticlockwise"),
];

pub fn supported_motion_styles() -> Vec<&'static str> {
    MOTION_STYLES.iter().map(|(style, _)| *style).collect()
}

/// LoRA filename stem for a requested style; unknown styles fall back to a
/// gentle zoom rather than failing the task.
pub fn motion_lora_name(style: Option<&str>) -> &'static str {
    let requested = style.unwrap_or("zoom-in").to_ascii_lowercase();
    MOTION_STYLES
        .iter()
        .find(|(name, _)| *name == requested)
        .map(|(_, lora)| *lora)
        .unwrap_or("ZoomIn")
}

/// Sampler and model constants for the motion pipeline. Not user-tunable;
/// the values were picked to keep motion subtle and the source image
/// recognizable.
#[derive(Debug, Clone)]
pub struct MotionWorkflowParams {
    pub checkpoint: &'static str,
    pub motion_module: &'static str,
    pub lora_strength: f64,
    pub frames: u32,
    pub frame_rate: u32,
    pub steps: u32,
    pub cfg: f64,
    pub denoise: f64,
}

impl Default for MotionWorkflowParams {
    fn default() -> Self {
        Self {
            checkpoint: "realisticVisionV60B1_v51HyperVAE.safetensors",
            motion_module: "v3_sd15_mm.ckpt",
            lora_strength: 0.5,
            frames: 32,
            frame_rate: 6,
            steps: 20,
            cfg: 6.5,
            denoise: 0.50,
        }
    }
}

/// Pure mapping from parameters to the backend graph. Node wiring follows
/// the checkpoint → motion module → LoRA → sampler → combine chain.
pub fn build_workflow(
    image_base64: &str,
    prompt: &str,
    lora: &str,
    params: &MotionWorkflowParams,
    seed: u64,
) -> Value {
    json!({
        "1": {
            "inputs": { "ckpt_name": params.checkpoint },
            "class_type": "CheckpointLoaderSimple"
        },
        "2": {
            "inputs": { "model_name": params.motion_module },
            "class_type": "ADE_LoadAnimateDiffModel"
        },
        "3": {
            "inputs": {
                "name": format!("v2_lora_{lora}.ckpt"),
                "strength": params.lora_strength
            },
            "class_type": "ADE_AnimateDiffLoRALoader"
        },
        "4": {
            "inputs": {
                "motion_model": ["2", 0],
                "motion_lora": ["3", 0],
                "start_percent": 0.0,
                "end_percent": 1.0
            },
            "class_type": "ADE_ApplyAnimateDiffModel"
        },
        "5": {
            "inputs": {
                "model": ["1", 0],
                "m_models": ["4", 0],
                "beta_schedule": "autoselect"
            },
            "class_type": "ADE_UseEvolvedSampling"
        },
        "6": {
            "inputs": { "text": prompt, "clip": ["1", 1] },
            "class_type": "CLIPTextEncode"
        },
        "7": {
            "inputs": { "text": NEGATIVE_PROMPT, "clip": ["1", 1] },
            "class_type": "CLIPTextEncode"
        },
        "8": {
            "inputs": {
                "base64_data": image_base64,
                "image_output": "Hide",
                "save_prefix": "ComfyUI"
            },
            "class_type": "easy loadImageBase64"
        },
        "9": {
            "inputs": { "pixels": ["8", 0], "vae": ["1", 2] },
            "class_type": "VAEEncode"
        },
        "10": {
            "inputs": { "samples": ["9", 0], "amount": params.frames },
            "class_type": "RepeatLatentBatch"
        },
        "11": {
            "inputs": {
                "seed": seed,
                "steps": params.steps,
                "cfg": params.cfg,
                "sampler_name": "euler",
                "scheduler": "normal",
                "denoise": params.denoise,
                "model": ["5", 0],
                "positive": ["6", 0],
                "negative": ["7", 0],
                "latent_image": ["10", 0]
            },
            "class_type": "KSampler"
        },
        "12": {
            "inputs": { "samples": ["11", 0], "vae": ["1", 2] },
            "class_type": "VAEDecode"
        },
        "13": {
            "inputs": {
                "images": ["12", 0],
                "frame_rate": params.frame_rate,
                "loop_count": 0,
                "filename_prefix": "animatediff_video",
                "format": "video/h264-mp4",
                "pingpong": false,
                "save_output": true
            },
            "class_type": "VHS_VideoCombine"
        }
    })
}

pub struct MotionTransferEngine {
    client: ComfyClient,
    params: MotionWorkflowParams,
    tracker: TrackerConfig,
}

impl MotionTransferEngine {
    pub fn new(client: ComfyClient) -> Self {
        Self {
            client,
            params: MotionWorkflowParams::default(),
            tracker: TrackerConfig {
                overall_timeout: std::time::Duration::from_secs(1200),
                max_poll_attempts: 240,
                ..TrackerConfig::default()
            },
        }
    }

    fn extraction_rule(&self) -> ExtractionRule {
        ExtractionRule {
            // A run that only produced frames still gives the user
            // something; take the first frame rather than failing.
            image_fallback: true,
            ..ExtractionRule::default()
        }
    }
}

#[async_trait]
impl GenerationEngine for MotionTransferEngine {
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
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image_bytes);

        let lora = motion_lora_name(input.motion_style.as_deref());
        let prompt = input.prompt_or(DEFAULT_PROMPT);
        let workflow = build_workflow(&image_base64, prompt, lora, &self.params, fresh_seed());

        let client_id = fresh_client_id();
        let prompt_id = self.client.queue_prompt(workflow, &client_id).await?;
        info!(engine = ENGINE_NAME, prompt_id = %prompt_id, lora, "workflow queued");

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
        await_artifact(
            &self.client,
            &job.client_id,
            &job.prompt_id,
            self.extraction_rule(),
            &self.tracker,
            on_progress,
        )
        .await
    }
}
