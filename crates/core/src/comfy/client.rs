use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::EngineError;

/// HTTP client for one ComfyUI instance.
///
/// Covers the four endpoints the orchestrator needs: workflow submission,
/// job history retrieval, source-image upload and the system-stats health
/// probe. The push channel lives in [`crate::tracker`]; `ws_url` only
/// derives its address.
#[derive(Debug, Clone)]
pub struct ComfyClient {
    base_url: Url,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct QueuePromptRequest {
    prompt: serde_json::Value,
    client_id: String,
}

#[derive(Debug, Deserialize)]
pub struct QueueResponse {
    pub prompt_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    name: String,
}

/// One entry of the `/history/{id}` map.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobHistory {
    #[serde(default)]
    pub outputs: HashMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<JobStatusInfo>,
}

/// Output slots a node may fill. Engines disagree about where the video
/// lands, so every known shape is kept and extraction decides later.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub videos: Vec<OutputFile>,
    #[serde(default)]
    pub gifs: Vec<OutputFile>,
    #[serde(default)]
    pub images: Vec<OutputFile>,
    #[serde(default)]
    pub text: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(default, rename = "type")]
    pub folder_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobStatusInfo {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
}

impl ComfyClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid backend base URL")?;
        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("failed to build URL for path: {path}"))
    }

    /// `POST /prompt` — queue a workflow graph for execution. Returns the
    /// backend's job id.
    pub async fn queue_prompt(
        &self,
        workflow: serde_json::Value,
        client_id: &str,
    ) -> Result<String, EngineError> {
        let url = self
            .url("/prompt")
            .map_err(|e| EngineError::Submission(e.to_string()))?;

        let request = QueuePromptRequest {
            prompt: workflow,
            client_id: client_id.to_string(),
        };

        let resp = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Submission(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Submission(format!("HTTP {status}: {body}")));
        }

        let queued: QueueResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Submission(format!("unparseable queue response: {e}")))?;

        Ok(queued.prompt_id)
    }

    /// `GET /history/{id}` — fetch the job's result record. The backend
    /// returns a map keyed by prompt id; an absent key means the job is not
    /// registered yet, which is `Ok(None)` here rather than an error.
    pub async fn history(&self, prompt_id: &str) -> Result<Option<JobHistory>, EngineError> {
        let url = self
            .url(&format!("/history/{prompt_id}"))
            .map_err(|e| EngineError::Submission(e.to_string()))?;

        let resp = self.client.get(url).send().await?;

        if !resp.status().is_success() {
            bail_transport(&resp).await?;
        }

        let mut record: HashMap<String, JobHistory> = resp.json().await?;
        Ok(record.remove(prompt_id))
    }

    /// `POST /upload/image` — push a source image into the backend's input
    /// store. Returns the stored filename to reference from workflows.
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<String, EngineError> {
        let url = self
            .url("/upload/image")
            .map_err(|e| EngineError::Submission(e.to_string()))?;

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("image", part);

        let resp = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| EngineError::Submission(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Submission(format!(
                "image upload failed: HTTP {status}: {body}"
            )));
        }

        let uploaded: UploadResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Submission(format!("unparseable upload response: {e}")))?;

        Ok(uploaded.name)
    }

    /// Absolute `/view` URL for a produced artifact.
    pub fn view_url(&self, filename: &str) -> String {
        let mut url = self.base_url.clone();
        url.set_path("/view");
        url.query_pairs_mut()
            .append_pair("filename", filename)
            .append_pair("type", "output");
        url.to_string()
    }

    /// Push-channel address for a given client correlation id.
    pub fn ws_url(&self, client_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .ok()
            .context("failed to derive websocket scheme")?;
        url.set_path("/ws");
        url.query_pairs_mut().append_pair("clientId", client_id);
        Ok(url)
    }

    /// `GET /system_stats` — verify the backend is reachable.
    pub async fn system_stats(&self) -> Result<serde_json::Value> {
        let url = self.url("/system_stats")?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to reach backend")?;

        if !resp.status().is_success() {
            bail!("backend /system_stats returned HTTP {}", resp.status().as_u16());
        }

        resp.json()
            .await
            .context("failed to parse system stats response")
    }

}

async fn bail_transport(resp: &reqwest::Response) -> Result<(), EngineError> {
    // Force a transport-shaped error out of a non-2xx status.
    Err(match resp.error_for_status_ref() {
        Err(e) => EngineError::Transport(e),
        Ok(_) => EngineError::Submission("unexpected backend response".to_string()),
    })
}
