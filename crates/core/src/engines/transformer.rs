//! Transformer text/image-to-video engine.
//!
//! The only engine serving both modes. Image conditioning goes through the
//! extended i2v sampler node; pure text requests build the full
//! load-encode-sample-decode chain. Generation is slow, so this engine
//! carries the largest tracking budget.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{fresh_client_id, fresh_seed, GenerationEngine, GenerationInput, GenerationMode, SubmittedJob};
use crate::comfy::{ArtifactRef, ComfyClient, ExtractionRule};
use crate::error::EngineError;
use crate::tracker::{await_artifact, ProgressSink, TrackerConfig};

pub const ENGINE_NAME: &str = "cogvideo";

const DEFAULT_I2V_PROMPT: &str = "high quality video, smooth motion, sharp details";
const DEFAULT_NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, warped, deformed, \
     grainy, blinking, mouth movement, text, watermark, artifacts, glitches, jerky motion";

/// Prompts that already ask for quality are left alone; bare prompts get
/// the quality preamble so short user input doesn't tank the output.
const QUALITY_KEYWORDS: [&str; 7] = [
    "quality",
    "detailed",
    "smooth",
    "cinematic",
    "professional",
    "4k",
    "high definition",
];

/// Frame-count limits: the sampler rejects counts that are not a multiple
/// of 4 and anything past the hard cap.
pub const MAX_FRAMES: u32 = 160;
pub const DEFAULT_I2V_FRAMES: u32 = 80;
pub const DEFAULT_T2V_FRAMES: u32 = 48;

/// Round a requested frame count down to the nearest multiple of 4 within
/// [4, MAX_FRAMES].
pub fn clamp_frames(requested: u32) -> u32 {
    (requested.min(MAX_FRAMES) / 4 * 4).max(4)
}

pub fn enhance_prompt(prompt: &str) -> String {
    let trimmed = prompt.trim();
    let lowered = trimmed.to_ascii_lowercase();
    if QUALITY_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        trimmed.to_string()
    } else {
        format!("high quality, smooth motion, cinematic, professional. {trimmed}")
    }
}

#[derive(Debug, Clone)]
pub struct TransformerWorkflowParams {
    pub i2v_frames: u32,
    pub t2v_frames: u32,
    pub frame_rate: u32,
    pub i2v_steps: u32,
    pub i2v_guidance: f64,
    pub t2v_steps: u32,
    pub t2v_cfg: f64,
    pub width: u32,
    pub height: u32,
}

impl Default for TransformerWorkflowParams {
    fn default() -> Self {
        Self {
            i2v_frames: DEFAULT_I2V_FRAMES,
            t2v_frames: DEFAULT_T2V_FRAMES,
            frame_rate: 16,
            i2v_steps: 20,
            i2v_guidance: 6.0,
            t2v_steps: 100,
            t2v_cfg: 8.0,
            width: 1024,
            height: 576,
        }
    }
}

/// Image-conditioned graph. The extended sampler folds interpolation and
/// optical-flow settings into one node; those stay at their speed-tuned
/// values.
pub fn build_i2v_workflow(
    uploaded_image: &str,
    prompt: &str,
    params: &TransformerWorkflowParams,
    seed: u64,
    filename_prefix: &str,
) -> Value {
    json!({
        "1": {
            "inputs": { "image": uploaded_image, "upload": "image" },
            "class_type": "LoadImage"
        },
        "2": {
            "inputs": {
                "prompt": prompt,
                "image": ["1", 0],
                "num_frames": clamp_frames(params.i2v_frames),
                "num_inference_steps": params.i2v_steps,
                "guidance_scale": params.i2v_guidance,
                "use_dynamic_cfg": true,
                "seed": seed,
                "interpolation_factor": 1,
                "flow_precision": 0.3,
                "motion_threshold": 0.15,
                "smoothness": 0.3,
                "flow_method": "Farneback",
                "edge_mode": "Replicate",
                "interpolation_strength": 0.5,
                "upscale_factor": 1.0
            },
            "class_type": "CogVideoX Image-2-Video Extended"
        },
        "3": {
            "inputs": {
                "video": ["2", 0],
                "filename_prefix": filename_prefix,
                "fps": params.frame_rate
            },
            "class_type": "CogVideoX Save Video"
        }
    })
}

/// Text-only graph: latent → text encoders → sampler → tiled decode →
/// save.
pub fn build_t2v_workflow(
    prompt: &str,
    negative_prompt: &str,
    params: &TransformerWorkflowParams,
    seed: u64,
    filename_prefix: &str,
) -> Value {
    json!({
        "0": {
            "inputs": {
                "width": params.width,
                "height": params.height,
                "batch_size": 1
            },
            "class_type": "EmptyLatentImage"
        },
        "1": {
            "inputs": { "clip_name": "t5xxl_fp8_e4m3fn.safetensors", "type": "sd3" },
            "class_type": "CLIPLoader"
        },
        "2": {
            "inputs": {
                "model": "kijai/CogVideoX-5b-1.5-T2V",
                "precision": "bf16",
                "quantization": "disabled",
                "enable_sequential_cpu_offload": false
            },
            "class_type": "DownloadAndLoadCogVideoModel"
        },
        "3": {
            "inputs": {
                "clip": ["1", 0],
                "prompt": prompt,
                "strength": 1.0,
                "force_offload": true
            },
            "class_type": "CogVideoTextEncode"
        },
        "4": {
            "inputs": {
                "clip": ["1", 0],
                "prompt": negative_prompt,
                "strength": 1.0,
                "force_offload": true
            },
            "class_type": "CogVideoTextEncode"
        },
        "5": {
            "inputs": {
                "model": ["2", 0],
                "positive": ["3", 0],
                "negative": ["4", 0],
                "num_frames": clamp_frames(params.t2v_frames),
                "steps": params.t2v_steps,
                "cfg": params.t2v_cfg,
                "seed": seed,
                "scheduler": "CogVideoXDDIM",
                "denoise_strength": 1.0,
                "samples": ["0", 0]
            },
            "class_type": "CogVideoSampler"
        },
        "6": {
            "inputs": {
                "vae": ["2", 1],
                "samples": ["5", 0],
                "enable_vae_tiling": true,
                "tile_sample_min_height": 240,
                "tile_sample_min_width": 360,
                "tile_overlap_factor_height": 0.2,
                "tile_overlap_factor_width": 0.2,
                "auto_tile_size": true
            },
            "class_type": "CogVideoDecode"
        },
        "7": {
            "inputs": { "images": ["6", 0], "fps": params.frame_rate },
            "class_type": "CreateVideo"
        },
        "8": {
            "inputs": {
                "video": ["7", 0],
                "filename_prefix": filename_prefix,
                "format": "mp4",
                "codec": "h264"
            },
            "class_type": "SaveVideo"
        }
    })
}

pub struct TransformerEngine {
    client: ComfyClient,
    params: TransformerWorkflowParams,
    tracker: TrackerConfig,
}

impl TransformerEngine {
    pub fn new(client: ComfyClient) -> Self {
        Self {
            client,
            params: TransformerWorkflowParams::default(),
            tracker: TrackerConfig {
                overall_timeout: std::time::Duration::from_secs(3600),
                max_poll_attempts: 1800,
                ..TrackerConfig::default()
            },
        }
    }

    fn extraction_rule(&self) -> ExtractionRule {
        // The save nodes report under three different shapes depending on
        // which one the graph ends in.
        ExtractionRule {
            video_in_images: true,
            text_path: true,
            ..ExtractionRule::default()
        }
    }
}

#[async_trait]
impl GenerationEngine for TransformerEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn supports(&self, _mode: GenerationMode) -> bool {
        true
    }

    async fn submit(&self, input: &GenerationInput) -> Result<SubmittedJob, EngineError> {
        let now_ms = chrono::Utc::now().timestamp_millis();

        let workflow = match input.mode {
            GenerationMode::ImageToVideo => {
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

                build_i2v_workflow(
                    &uploaded,
                    input.prompt_or(DEFAULT_I2V_PROMPT),
                    &self.params,
                    fresh_seed(),
                    &format!("cogvideo_{now_ms}"),
                )
            }
            GenerationMode::TextToVideo => {
                // Text mode without a prompt is rejected outright rather
                // than downgraded to the image path.
                let prompt = input.require_prompt()?;
                build_t2v_workflow(
                    &enhance_prompt(prompt),
                    DEFAULT_NEGATIVE_PROMPT,
                    &self.params,
                    fresh_seed(),
                    &format!("t2v_{now_ms}"),
                )
            }
        };

        let client_id = fresh_client_id();
        let prompt_id = self.client.queue_prompt(workflow, &client_id).await?;
        info!(
            engine = ENGINE_NAME,
            prompt_id = %prompt_id,
            mode = input.mode.as_str(),
            "workflow queued"
        );

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
