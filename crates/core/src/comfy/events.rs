use serde_json::Value;

/// One frame from the backend's push channel.
///
/// The wire format is `{"type": "...", "data": {...}}`. Frame types the
/// tracker does not care about (queue status, crystools monitors, binary
/// previews) collapse into `Other` instead of failing the parse.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Node-level heartbeat; `node` is None when the run finished flushing.
    Executing { node: Option<String> },
    /// Sampler progress counter.
    Progress { value: u64, max: u64 },
    /// Terminal success signal (`execution_complete` or `executed`).
    Completed { prompt_id: String },
    /// Terminal failure with the backend's diagnostic payload.
    Error { prompt_id: Option<String>, message: String },
    Other,
}

impl PushEvent {
    pub fn from_json(raw: &str) -> Option<PushEvent> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let kind = value.get("type")?.as_str()?;
        let data = value.get("data").cloned().unwrap_or(Value::Null);

        let event = match kind {
            "executing" => PushEvent::Executing {
                node: data
                    .get("node")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
            },
            "progress" => PushEvent::Progress {
                value: data.get("value").and_then(Value::as_u64)?,
                max: data.get("max").and_then(Value::as_u64)?,
            },
            "execution_complete" | "executed" | "execution_success" => PushEvent::Completed {
                prompt_id: data
                    .get("prompt_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "execution_error" => PushEvent::Error {
                prompt_id: data
                    .get("prompt_id")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
                message: data.to_string(),
            },
            _ => PushEvent::Other,
        };

        Some(event)
    }

    /// Progress as an integer percentage, saturating at 100.
    pub fn percent(value: u64, max: u64) -> u8 {
        if max == 0 {
            return 0;
        }
        ((value.saturating_mul(100) / max).min(100)) as u8
    }
}
