//! Completion tracking for submitted backend jobs.
//!
//! A job is watched over the push channel first; polling the history
//! endpoint is the safety net whenever the channel goes quiet, drops, or
//! the progress counter hits 100% without a completion frame. Each job
//! resolves exactly once: the watch loop returns a single outcome and the
//! poll loop runs only when the watch handed over to it.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::comfy::{
    extract_artifact, has_any_output, ArtifactRef, ComfyClient, ExtractionRule, PushEvent,
};
use crate::error::EngineError;

/// Timing profile for one engine. Slow engines get a higher ceiling and a
/// bigger polling budget.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// Absolute per-job ceiling across both phases.
    pub overall_timeout: Duration,
    /// Delay between history fetches in poll mode.
    pub poll_interval: Duration,
    /// Poll-mode attempt budget.
    pub max_poll_attempts: u32,
    /// How long to wait for a completion frame after progress reached 100%.
    pub progress_grace: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            max_poll_attempts: 240,
            progress_grace: Duration::from_secs(10),
        }
    }
}

pub type ProgressSink<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// What the event phase decided. `Poll` hands the job to the fallback loop
/// instead of failing it outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Completed,
    Failed(String),
    Poll(PollReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollReason {
    /// Progress hit 100% but no completion frame arrived within the grace
    /// window.
    ProgressStalled,
    ChannelClosed,
    ChannelError,
    DeadlineExpired,
}

pub type EventResult = Result<PushEvent, String>;

/// Drive the event phase until the job resolves or has to be handed to the
/// poll loop. Returns exactly one outcome; competing triggers (completion
/// frame vs. grace timer vs. channel drop) race inside the select and the
/// first one wins.
pub async fn watch_events<S>(
    mut events: S,
    prompt_id: &str,
    config: &TrackerConfig,
    on_progress: ProgressSink<'_>,
) -> WatchOutcome
where
    S: Stream<Item = EventResult> + Unpin,
{
    let deadline = Instant::now() + config.overall_timeout;
    let mut grace_at: Option<Instant> = None;

    loop {
        let grace_timer = async move {
            match grace_at {
                Some(at) => sleep_until(at).await,
                None => futures::future::pending().await,
            }
        };

        tokio::select! {
            _ = sleep_until(deadline) => {
                warn!(prompt_id, "event phase hit the overall ceiling");
                return WatchOutcome::Poll(PollReason::DeadlineExpired);
            }
            _ = grace_timer => {
                info!(prompt_id, "progress reached 100% without a completion frame");
                return WatchOutcome::Poll(PollReason::ProgressStalled);
            }
            item = events.next() => match item {
                None => {
                    info!(prompt_id, "push channel closed before resolution");
                    return WatchOutcome::Poll(PollReason::ChannelClosed);
                }
                Some(Err(err)) => {
                    warn!(prompt_id, error = %err, "push channel error");
                    return WatchOutcome::Poll(PollReason::ChannelError);
                }
                Some(Ok(event)) => match event {
                    PushEvent::Progress { value, max } => {
                        on_progress(PushEvent::percent(value, max));
                        if max > 0 && value >= max {
                            if grace_at.is_none() {
                                grace_at = Some(Instant::now() + config.progress_grace);
                            }
                        } else {
                            // A later node started sampling; the earlier
                            // 100% was not the end of the run.
                            grace_at = None;
                        }
                    }
                    PushEvent::Executing { node } => {
                        debug!(prompt_id, node = node.as_deref().unwrap_or("-"), "executing");
                    }
                    PushEvent::Completed { prompt_id: pid } => {
                        // Some backends omit the id on the final frame.
                        if pid == prompt_id || pid.is_empty() {
                            return WatchOutcome::Completed;
                        }
                    }
                    PushEvent::Error { prompt_id: pid, message } => {
                        if pid.as_deref().map_or(true, |p| p == prompt_id) {
                            return WatchOutcome::Failed(message);
                        }
                    }
                    PushEvent::Other => {}
                },
            }
        }
    }
}

/// Poll the history endpoint until an artifact shows up or a budget runs
/// out. A missing history record means the job is not registered
/// backend-side yet — keep polling. Once the absolute deadline passes the
/// loop gets one last attempt before giving up.
pub async fn poll_for_artifact(
    client: &ComfyClient,
    prompt_id: &str,
    rule: ExtractionRule,
    config: &TrackerConfig,
    deadline: Instant,
) -> Result<ArtifactRef, EngineError> {
    let mut attempts: u32 = 0;

    loop {
        let last_chance = Instant::now() >= deadline;
        attempts += 1;

        match client.history(prompt_id).await {
            Ok(Some(history)) => {
                if let Some(status) = &history.status {
                    if status.status_str == "error" {
                        return Err(EngineError::ExecutionFailed(format!(
                            "backend reported status '{}'",
                            status.status_str
                        )));
                    }
                }

                if has_any_output(&history, rule) {
                    return extract_artifact(client, &history, rule)
                        .ok_or(EngineError::NoArtifactFound);
                }
            }
            Ok(None) => {
                debug!(prompt_id, attempts, "job not registered backend-side yet");
            }
            Err(err) => {
                // Transient fetch failures burn an attempt but do not fail
                // the job; the backend may be mid-restart.
                debug!(prompt_id, attempts, error = %err, "history fetch failed");
            }
        }

        if last_chance {
            return Err(EngineError::OverallTimeout(config.overall_timeout));
        }
        if attempts >= config.max_poll_attempts {
            return Err(EngineError::PollTimeout { attempts });
        }

        sleep(config.poll_interval).await;
    }
}

/// Full tracking run for one submitted job: open the push channel, watch,
/// then either retrieve the artifact or fall back to polling. A connect
/// failure is not fatal — the job may still be running, so polling takes
/// over immediately.
pub async fn await_artifact(
    client: &ComfyClient,
    client_id: &str,
    prompt_id: &str,
    rule: ExtractionRule,
    config: &TrackerConfig,
    on_progress: ProgressSink<'_>,
) -> Result<ArtifactRef, EngineError> {
    let deadline = Instant::now() + config.overall_timeout;

    let outcome = match open_push_channel(client, client_id).await {
        Ok(events) => watch_events(events, prompt_id, config, on_progress).await,
        Err(err) => {
            warn!(prompt_id, error = %err, "push channel connect failed; polling instead");
            WatchOutcome::Poll(PollReason::ChannelError)
        }
    };

    match outcome {
        WatchOutcome::Completed => {
            info!(prompt_id, "completion frame received; retrieving artifact");
            retrieve_artifact(client, prompt_id, rule).await
        }
        WatchOutcome::Failed(diagnostic) => Err(EngineError::ExecutionFailed(diagnostic)),
        WatchOutcome::Poll(reason) => {
            info!(prompt_id, ?reason, "switching to poll mode");
            poll_for_artifact(client, prompt_id, rule, config, deadline).await
        }
    }
}

async fn retrieve_artifact(
    client: &ComfyClient,
    prompt_id: &str,
    rule: ExtractionRule,
) -> Result<ArtifactRef, EngineError> {
    let history = client
        .history(prompt_id)
        .await?
        .ok_or(EngineError::NoArtifactFound)?;

    extract_artifact(client, &history, rule).ok_or(EngineError::NoArtifactFound)
}

/// Connect the push channel and adapt the socket into a stream of parsed
/// events. Binary frames (preview images) and unparseable text are skipped.
async fn open_push_channel(
    client: &ComfyClient,
    client_id: &str,
) -> anyhow::Result<impl Stream<Item = EventResult> + Unpin> {
    let url = client.ws_url(client_id)?;
    let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (_write, read) = socket.split();

    let events = read.filter_map(|frame| async move {
        match frame {
            Ok(msg) => msg
                .to_text()
                .ok()
                .and_then(PushEvent::from_json)
                .map(Ok),
            Err(err) => Some(Err(err.to_string())),
        }
    });

    Ok(events.boxed())
}
