//! Chat delivery of finished artifacts.
//!
//! Delivery is fire-and-forget from the task's point of view: the artifact
//! already exists, so a failed send is logged and the task stays
//! SUCCEEDED.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::task::Task;

#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Push a finished video to the chat identified by `chat_id`.
    async fn send_video(&self, chat_id: &str, video: &Path, caption: &str) -> anyhow::Result<()>;
}

/// Telegram Bot API sink (`sendVideo` with a multipart file upload).
pub struct TelegramDelivery {
    api_url: String,
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramDelivery {
    pub fn new(api_url: &str, bot_token: &str) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_url, self.bot_token)
    }
}

#[async_trait]
impl DeliverySink for TelegramDelivery {
    async fn send_video(&self, chat_id: &str, video: &Path, caption: &str) -> anyhow::Result<()> {
        let bytes = tokio::fs::read(video).await?;
        let filename = video
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video.mp4")
            .to_string();

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str("video/mp4")?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("video", part);

        let resp = self
            .client
            .post(self.method_url("sendVideo"))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("sendVideo returned HTTP {status}: {body}");
        }

        info!(chat_id, "video delivered");
        Ok(())
    }
}

/// Message shown above the delivered video.
pub fn delivery_caption(task: &Task) -> String {
    let mut caption = format!("Your video is ready!\n\nEngine: {}", task.engine);
    if let Some(motion) = &task.motion {
        caption.push_str(&format!("\nMotion: {motion}"));
    }
    if let Some(prompt) = &task.prompt {
        caption.push_str(&format!("\nPrompt: {prompt}"));
    }
    caption
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::GenerationMode;

    #[test]
    fn caption_includes_engine_motion_and_prompt() {
        let task = Task::new(
            "animatediff",
            GenerationMode::ImageToVideo,
            "42".to_string(),
            Some("a quiet street".to_string()),
            Some("zoom-in".to_string()),
            None,
        );

        let caption = delivery_caption(&task);
        assert!(caption.contains("Engine: animatediff"));
        assert!(caption.contains("Motion: zoom-in"));
        assert!(caption.contains("Prompt: a quiet street"));
    }

    #[test]
    fn caption_skips_absent_fields() {
        let task = Task::new(
            "cogvideo",
            GenerationMode::TextToVideo,
            "42".to_string(),
            None,
            None,
            None,
        );

        let caption = delivery_caption(&task);
        assert!(caption.contains("Engine: cogvideo"));
        assert!(!caption.contains("Motion:"));
        assert!(!caption.contains("Prompt:"));
    }

    #[test]
    fn method_url_embeds_token() {
        let sink = TelegramDelivery::new("https://api.telegram.org/", "123:abc");
        assert_eq!(
            sink.method_url("sendVideo"),
            "https://api.telegram.org/bot123:abc/sendVideo"
        );
    }
}
