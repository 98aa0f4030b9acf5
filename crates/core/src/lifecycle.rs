//! Task lifecycle: creation, the per-task processing pipeline, and
//! cleanup scheduling. This is the only component that mutates task
//! records.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::comfy::ArtifactRef;
use crate::config::CleanupConfig;
use crate::delivery::{delivery_caption, DeliverySink};
use crate::engines::{EngineSet, GenerationEngine, GenerationInput, GenerationMode};
use crate::error::EngineError;
use crate::quota::{QuotaService, UsageEvent};
use crate::task::{Task, TaskRegistry, TaskStatus, ANONYMOUS_USER};

/// Progress reported by the tracker is squeezed into this band so the
/// pipeline milestones (submit, download, done) still bracket it.
const PROGRESS_FLOOR: u8 = 10;
const PROGRESS_CEILING: u8 = 95;

/// Incoming generation request after JSON deserialization, before
/// validation.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub user_id: String,
    pub engine: String,
    pub mode: GenerationMode,
    pub prompt: Option<String>,
    pub image_id: Option<String>,
    pub motion_style: Option<String>,
    pub motion_strength: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateTaskError {
    #[error("{0}")]
    Validation(String),
    #[error("image not found: {0}")]
    ImageNotFound(String),
}

#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<LifecycleInner>,
}

struct LifecycleInner {
    registry: Arc<TaskRegistry>,
    engines: EngineSet,
    quota: Arc<dyn QuotaService>,
    delivery: Option<Arc<dyn DeliverySink>>,
    cleanup: CleanupConfig,
    temp_dir: PathBuf,
    output_dir: PathBuf,
    http: reqwest::Client,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<TaskRegistry>,
        engines: EngineSet,
        quota: Arc<dyn QuotaService>,
        delivery: Option<Arc<dyn DeliverySink>>,
        cleanup: CleanupConfig,
        temp_dir: PathBuf,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                registry,
                engines,
                quota,
                delivery,
                cleanup,
                temp_dir,
                output_dir,
                http: reqwest::Client::new(),
            }),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    pub fn quota(&self) -> &Arc<dyn QuotaService> {
        &self.inner.quota
    }

    pub fn engines(&self) -> &EngineSet {
        &self.inner.engines
    }

    pub fn temp_dir(&self) -> &Path {
        &self.inner.temp_dir
    }

    /// Validate a request, insert a PENDING record and launch the
    /// processing pipeline. The caller gets the id back immediately;
    /// generation continues in the background.
    pub fn create_task(&self, request: TaskRequest) -> Result<String, CreateTaskError> {
        let engine = self.inner.engines.get(&request.engine).ok_or_else(|| {
            CreateTaskError::Validation(format!("unsupported engine: {}", request.engine))
        })?;

        if !engine.supports(request.mode) {
            return Err(CreateTaskError::Validation(format!(
                "engine {} does not support {} mode",
                request.engine,
                request.mode.as_str()
            )));
        }

        let image_path = match request.mode {
            GenerationMode::TextToVideo => {
                let prompt_len = request
                    .prompt
                    .as_deref()
                    .map(str::trim)
                    .map_or(0, str::len);
                if prompt_len == 0 {
                    return Err(CreateTaskError::Validation(
                        "text-to-video mode requires a prompt".to_string(),
                    ));
                }
                None
            }
            GenerationMode::ImageToVideo => {
                let image_id = request.image_id.as_deref().ok_or_else(|| {
                    CreateTaskError::Validation(
                        "image-to-video mode requires an uploaded image".to_string(),
                    )
                })?;
                let image_id = sanitize_image_id(image_id)
                    .map_err(CreateTaskError::Validation)?;
                let path = self.inner.temp_dir.join(image_id);
                if !path.is_file() {
                    return Err(CreateTaskError::ImageNotFound(image_id.to_string()));
                }
                Some(path)
            }
        };

        let motion_display = request
            .motion_style
            .clone()
            .or_else(|| request.motion_strength.map(|s| s.to_string()));

        let task = Task::new(
            &request.engine,
            request.mode,
            request.user_id.clone(),
            request.prompt.clone().filter(|p| !p.trim().is_empty()),
            motion_display,
            image_path.clone(),
        );
        let task_id = task.id.clone();
        self.inner.registry.insert(task);

        let input = GenerationInput {
            mode: request.mode,
            prompt: request.prompt,
            image_path,
            motion_style: request.motion_style,
            motion_strength: request.motion_strength,
        };

        let manager = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            manager.process(id, engine, input).await;
        });

        info!(%task_id, engine = %request.engine, "task created");
        Ok(task_id)
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.inner.registry.get(id)
    }

    /// Immediate cleanup on user request. Best-effort and idempotent: a
    /// second call finds nothing left to remove and still succeeds. The
    /// backend job itself is not cancelled; a completion arriving for an
    /// evicted record is discarded at the registry.
    pub fn delete_task(&self, id: &str) {
        self.cleanup_files(id);

        let manager = self.clone();
        let id = id.to_string();
        let evict_delay = Duration::from_secs(self.inner.cleanup.evict_delay_secs);
        tokio::spawn(async move {
            tokio::time::sleep(evict_delay).await;
            if manager.inner.registry.remove(&id).is_some() {
                info!(task_id = %id, "task record evicted");
            }
        });
    }

    /// The per-task pipeline. Strictly sequential: submit → await →
    /// download → record usage → deliver → schedule cleanup. Any failure
    /// settles the record as FAILED; nothing is retried.
    async fn process(&self, task_id: String, engine: Arc<dyn GenerationEngine>, input: GenerationInput) {
        self.inner.registry.transition(&task_id, TaskStatus::Running);
        self.inner.registry.set_progress(&task_id, PROGRESS_FLOOR);

        match self.run_generation(&task_id, engine, input).await {
            Ok(Some((artifact, local_path))) => {
                self.inner.registry.transition(&task_id, TaskStatus::Succeeded);
                self.inner.registry.update(&task_id, |task| {
                    task.progress = 100;
                    task.video_url = Some(artifact.url.clone());
                    task.filename = Some(artifact.filename.clone());
                    task.video_path = Some(local_path.clone());
                });
                info!(%task_id, filename = %artifact.filename, "task succeeded");

                self.after_success(&task_id).await;
            }
            Ok(None) => {
                // Record disappeared mid-flight (deleted); nothing to do.
                info!(%task_id, "discarding result for deleted task");
            }
            Err(err) => {
                error!(%task_id, error = %err, "task failed");
                self.inner.registry.transition(&task_id, TaskStatus::Failed);
                self.inner.registry.update(&task_id, |task| {
                    task.error = Some(err.to_string());
                });
            }
        }
    }

    /// Submission through artifact download. `Ok(None)` means the task was
    /// deleted while the backend worked.
    async fn run_generation(
        &self,
        task_id: &str,
        engine: Arc<dyn GenerationEngine>,
        input: GenerationInput,
    ) -> Result<Option<(ArtifactRef, PathBuf)>, EngineError> {
        let job = engine.submit(&input).await?;

        let registry = Arc::clone(&self.inner.registry);
        let id_for_progress = task_id.to_string();
        let on_progress = move |percent: u8| {
            registry.set_progress(&id_for_progress, scale_progress(percent));
        };

        let artifact = engine.await_result(&job, &on_progress).await?;

        if !self.inner.registry.contains(task_id) {
            return Ok(None);
        }

        let local_path = self.inner.output_dir.join(format!("{task_id}.mp4"));
        self.download_artifact(&artifact.url, &local_path).await?;

        Ok(Some((artifact, local_path)))
    }

    async fn download_artifact(&self, url: &str, dest: &Path) -> Result<(), EngineError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::Submission(format!("cannot create output dir: {e}")))?;
        }

        let resp = self.inner.http.get(url).send().await?.error_for_status()?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| EngineError::Submission(format!("cannot create artifact file: {e}")))?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| EngineError::Submission(format!("artifact write failed: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| EngineError::Submission(format!("artifact flush failed: {e}")))?;

        Ok(())
    }

    /// Usage recording, chat delivery, and the cleanup timer. None of
    /// these can fail the task anymore.
    async fn after_success(&self, task_id: &str) {
        let Some(task) = self.inner.registry.get(task_id) else {
            return;
        };

        if !task.is_anonymous() {
            let event = UsageEvent {
                task_id: task.id.clone(),
                engine: task.engine.clone(),
                motion: task.motion.clone(),
                timestamp: chrono::Utc::now(),
            };
            if let Err(err) = self.inner.quota.record_usage(&task.user_id, event).await {
                warn!(task_id, error = %err, "usage recording failed");
            }
        }

        let mut delivered = false;
        if !task.is_anonymous() {
            if let (Some(sink), Some(video_path)) = (&self.inner.delivery, &task.video_path) {
                match sink
                    .send_video(&task.user_id, video_path, &delivery_caption(&task))
                    .await
                {
                    Ok(()) => delivered = true,
                    Err(err) => {
                        // The artifact exists; only the notification failed.
                        warn!(task_id, error = %err, "chat delivery failed");
                    }
                }
            }
        }

        let delay_secs = if delivered {
            self.inner.cleanup.chat_delay_secs
        } else {
            self.inner.cleanup.web_delay_secs
        };
        self.schedule_cleanup(task_id, Duration::from_secs(delay_secs));
    }

    fn schedule_cleanup(&self, task_id: &str, delay: Duration) {
        let manager = self.clone();
        let id = task_id.to_string();
        let evict_delay = Duration::from_secs(self.inner.cleanup.evict_delay_secs);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.cleanup_files(&id);

            tokio::time::sleep(evict_delay).await;
            if manager.inner.registry.remove(&id).is_some() {
                info!(task_id = %id, "task record evicted");
            }
        });
    }

    /// Delete the task's local files. Always best-effort: a missing file
    /// or permission problem is logged and swallowed.
    fn cleanup_files(&self, task_id: &str) {
        let Some(task) = self.inner.registry.get(task_id) else {
            return;
        };

        for path in [task.image_path.as_ref(), task.video_path.as_ref()]
            .into_iter()
            .flatten()
        {
            match std::fs::remove_file(path) {
                Ok(()) => info!(task_id, path = %path.display(), "removed task file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(task_id, path = %path.display(), error = %err, "file cleanup failed");
                }
            }
        }
    }
}

fn scale_progress(percent: u8) -> u8 {
    let span = (PROGRESS_CEILING - PROGRESS_FLOOR) as u32;
    PROGRESS_FLOOR + (percent.min(100) as u32 * span / 100) as u8
}

/// Image ids come from the upload endpoint, but the status API accepts
/// arbitrary strings; keep them from escaping the temp directory.
pub fn sanitize_image_id(raw: &str) -> Result<&str, String> {
    let id = raw.trim();
    if id.is_empty() {
        return Err("image id must not be empty".to_string());
    }
    if id.contains('/') || id.contains('\\') {
        return Err("image id must not contain path separators".to_string());
    }
    if id.contains("..") {
        return Err("image id must not contain '..'".to_string());
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comfy::ArtifactRef;
    use crate::quota::{Allowance, Unmetered};
    use crate::tracker::ProgressSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Engine double: submission/await behavior is scripted per test and
    /// every call is counted.
    struct MockEngine {
        name: &'static str,
        submit_calls: AtomicU32,
        fail_submit: Option<String>,
        await_result: Mutex<Option<Result<ArtifactRef, EngineError>>>,
        progress_to_report: Vec<u8>,
        hold: Option<Arc<tokio::sync::Notify>>,
    }

    impl MockEngine {
        fn succeeding(url: &str, filename: &str) -> Self {
            Self {
                name: "mock",
                submit_calls: AtomicU32::new(0),
                fail_submit: None,
                await_result: Mutex::new(Some(Ok(ArtifactRef {
                    url: url.to_string(),
                    filename: filename.to_string(),
                }))),
                progress_to_report: vec![50],
                hold: None,
            }
        }

        fn failing_submit(message: &str) -> Self {
            Self {
                fail_submit: Some(message.to_string()),
                await_result: Mutex::new(None),
                progress_to_report: vec![],
                ..Self::succeeding("http://unused", "f.mp4")
            }
        }

        fn timing_out() -> Self {
            Self {
                await_result: Mutex::new(Some(Err(EngineError::OverallTimeout(
                    Duration::from_secs(300),
                )))),
                progress_to_report: vec![],
                ..Self::succeeding("http://unused", "f.mp4")
            }
        }
    }

    #[async_trait]
    impl GenerationEngine for MockEngine {
        fn name(&self) -> &'static str {
            self.name
        }

        fn supports(&self, _mode: GenerationMode) -> bool {
            true
        }

        async fn submit(&self, _input: &GenerationInput) -> Result<crate::engines::SubmittedJob, EngineError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.fail_submit {
                return Err(EngineError::Submission(message.clone()));
            }
            Ok(crate::engines::SubmittedJob {
                prompt_id: "mock-prompt".to_string(),
                client_id: "mock-client".to_string(),
            })
        }

        async fn await_result(
            &self,
            _job: &crate::engines::SubmittedJob,
            on_progress: ProgressSink<'_>,
        ) -> Result<ArtifactRef, EngineError> {
            for percent in &self.progress_to_report {
                on_progress(*percent);
            }
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            self.await_result
                .lock()
                .unwrap()
                .take()
                .expect("await_result called more than once")
        }
    }

    struct RecordingQuota {
        events: Mutex<Vec<(String, UsageEvent)>>,
    }

    #[async_trait]
    impl QuotaService for RecordingQuota {
        async fn check_allowance(&self, _user_id: &str) -> anyhow::Result<Allowance> {
            Ok(Allowance::unlimited())
        }

        async fn record_usage(&self, user_id: &str, event: UsageEvent) -> anyhow::Result<()> {
            self.events
                .lock()
                .unwrap()
                .push((user_id.to_string(), event));
            Ok(())
        }
    }

    fn manager_with(
        engine: Arc<dyn GenerationEngine>,
        quota: Arc<dyn QuotaService>,
        dirs: &tempfile::TempDir,
    ) -> LifecycleManager {
        let mut engines = EngineSet::empty();
        engines.register(engine);
        LifecycleManager::new(
            Arc::new(TaskRegistry::new()),
            engines,
            quota,
            None,
            CleanupConfig {
                chat_delay_secs: 0,
                web_delay_secs: 0,
                evict_delay_secs: 3600,
            },
            dirs.path().join("temp"),
            dirs.path().join("output"),
        )
    }

    fn t2v_request(prompt: &str) -> TaskRequest {
        TaskRequest {
            user_id: ANONYMOUS_USER.to_string(),
            engine: "mock".to_string(),
            mode: GenerationMode::TextToVideo,
            prompt: Some(prompt.to_string()),
            image_id: None,
            motion_style: None,
            motion_strength: None,
        }
    }

    async fn wait_for_terminal(manager: &LifecycleManager, id: &str) -> Task {
        for _ in 0..200 {
            if let Some(task) = manager.get_task(id) {
                if task.status.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached a terminal state");
    }

    /// Tiny HTTP server handing out fixed bytes, standing in for the
    /// backend's /view endpoint.
    async fn serve_bytes(body: &'static [u8]) -> String {
        use axum::routing::get;
        let app = axum::Router::new().route("/video.mp4", get(move || async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/video.mp4")
    }

    #[tokio::test]
    async fn round_trip_succeeds_and_downloads_artifact() {
        let dirs = tempfile::tempdir().unwrap();
        let url = serve_bytes(b"fake mp4 bytes").await;
        let engine = Arc::new(MockEngine::succeeding(&url, "f.mp4"));
        let manager = manager_with(engine.clone(), Arc::new(Unmetered), &dirs);

        let id = manager.create_task(t2v_request("a lighthouse at dusk")).unwrap();
        assert_eq!(manager.get_task(&id).unwrap().engine, "mock");

        let task = wait_for_terminal(&manager, &id).await;
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.progress, 100);
        assert_eq!(task.video_url.as_deref(), Some(url.as_str()));
        assert_eq!(task.filename.as_deref(), Some("f.mp4"));

        let local = task.video_path.expect("local artifact path");
        assert_eq!(std::fs::read(local).unwrap(), b"fake mp4 bytes");
        assert_eq!(engine.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_t2v_prompt_is_rejected_before_any_engine_call() {
        let dirs = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::succeeding("http://unused", "f.mp4"));
        let manager = manager_with(engine.clone(), Arc::new(Unmetered), &dirs);

        let err = manager.create_task(t2v_request("   ")).unwrap_err();
        assert!(matches!(err, CreateTaskError::Validation(_)));
        assert_eq!(engine.submit_calls.load(Ordering::SeqCst), 0);
        assert!(manager.registry().is_empty(), "no record for rejected request");
    }

    #[tokio::test]
    async fn missing_image_file_is_not_found() {
        let dirs = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::succeeding("http://unused", "f.mp4"));
        let manager = manager_with(engine, Arc::new(Unmetered), &dirs);

        let request = TaskRequest {
            mode: GenerationMode::ImageToVideo,
            image_id: Some("gone.jpg".to_string()),
            prompt: None,
            ..t2v_request("")
        };
        let err = manager.create_task(request).unwrap_err();
        assert!(matches!(err, CreateTaskError::ImageNotFound(_)));
    }

    #[tokio::test]
    async fn unknown_engine_is_a_validation_error() {
        let dirs = tempfile::tempdir().unwrap();
        let manager = manager_with(
            Arc::new(MockEngine::succeeding("http://unused", "f.mp4")),
            Arc::new(Unmetered),
            &dirs,
        );

        let request = TaskRequest {
            engine: "imaginary".to_string(),
            ..t2v_request("prompt")
        };
        let err = manager.create_task(request).unwrap_err();
        assert!(err.to_string().contains("unsupported engine"));
    }

    #[tokio::test]
    async fn submission_failure_marks_task_failed_with_backend_message() {
        let dirs = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::failing_submit("model not loaded"));
        let manager = manager_with(engine, Arc::new(Unmetered), &dirs);

        let id = manager.create_task(t2v_request("prompt")).unwrap();
        let task = wait_for_terminal(&manager, &id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("model not loaded"));
    }

    #[tokio::test]
    async fn tracker_timeout_surfaces_as_failed_with_timeout_message() {
        let dirs = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::timing_out());
        let manager = manager_with(engine, Arc::new(Unmetered), &dirs);

        let id = manager.create_task(t2v_request("prompt")).unwrap();
        let task = wait_for_terminal(&manager, &id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("did not complete"));
    }

    #[tokio::test]
    async fn usage_is_recorded_for_identified_users_only() {
        let dirs = tempfile::tempdir().unwrap();
        let url = serve_bytes(b"bytes").await;
        let quota = Arc::new(RecordingQuota {
            events: Mutex::new(Vec::new()),
        });

        let engine = Arc::new(MockEngine::succeeding(&url, "f.mp4"));
        let manager = manager_with(engine, quota.clone(), &dirs);
        let request = TaskRequest {
            user_id: "7001".to_string(),
            ..t2v_request("prompt")
        };
        let id = manager.create_task(request).unwrap();
        wait_for_terminal(&manager, &id).await;
        // Usage write happens after the terminal transition.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = quota.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "7001");
        assert_eq!(events[0].1.task_id, id);
    }

    #[tokio::test]
    async fn anonymous_tasks_skip_usage_recording() {
        let dirs = tempfile::tempdir().unwrap();
        let url = serve_bytes(b"bytes").await;
        let quota = Arc::new(RecordingQuota {
            events: Mutex::new(Vec::new()),
        });

        let engine = Arc::new(MockEngine::succeeding(&url, "f.mp4"));
        let manager = manager_with(engine, quota.clone(), &dirs);
        let id = manager.create_task(t2v_request("prompt")).unwrap();
        wait_for_terminal(&manager, &id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(quota.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_task_is_idempotent_and_removes_files() {
        let dirs = tempfile::tempdir().unwrap();
        let url = serve_bytes(b"bytes").await;
        let engine = Arc::new(MockEngine::succeeding(&url, "f.mp4"));
        let manager = manager_with(engine, Arc::new(Unmetered), &dirs);

        let id = manager.create_task(t2v_request("prompt")).unwrap();
        let task = wait_for_terminal(&manager, &id).await;
        let video_path = task.video_path.clone().unwrap();
        assert!(video_path.exists());

        manager.delete_task(&id);
        assert!(!video_path.exists());

        // Second delete finds a clean filesystem and still succeeds.
        manager.delete_task(&id);
        assert!(!video_path.exists());
    }

    #[tokio::test]
    async fn status_walks_through_running_with_mid_band_progress() {
        let dirs = tempfile::tempdir().unwrap();
        let url = serve_bytes(b"bytes").await;
        let hold = Arc::new(tokio::sync::Notify::new());
        let engine = Arc::new(MockEngine {
            progress_to_report: vec![50],
            hold: Some(hold.clone()),
            ..MockEngine::succeeding(&url, "f.mp4")
        });
        let manager = manager_with(engine, Arc::new(Unmetered), &dirs);

        let id = manager.create_task(t2v_request("prompt")).unwrap();

        // The engine is parked after reporting 50%; the record must show
        // RUNNING with progress strictly inside (0, 100).
        let mut observed_running = false;
        for _ in 0..200 {
            let task = manager.get_task(&id).unwrap();
            if task.status == TaskStatus::Running && task.progress > 0 && task.progress < 100 {
                observed_running = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(observed_running, "never saw a mid-band RUNNING snapshot");

        hold.notify_one();
        let task = wait_for_terminal(&manager, &id).await;
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.progress, 100);
    }

    #[test]
    fn progress_scaling_stays_inside_band() {
        assert_eq!(scale_progress(0), 10);
        assert_eq!(scale_progress(100), 95);
        assert!(scale_progress(50) > 10 && scale_progress(50) < 95);
        assert_eq!(scale_progress(200), 95);
    }

    #[test]
    fn image_id_sanitization_rejects_traversal() {
        assert!(sanitize_image_id("img_123.jpg").is_ok());
        assert!(sanitize_image_id("").is_err());
        assert!(sanitize_image_id("a/b.jpg").is_err());
        assert!(sanitize_image_id("a\\b.jpg").is_err());
        assert!(sanitize_image_id("..secret").is_err());
    }
}
