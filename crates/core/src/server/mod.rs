use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::comfy::ComfyClient;
use crate::config::AppConfig;
use crate::delivery::TelegramDelivery;
use crate::engines::{diffusion, motion, EngineSet, GenerationMode};
use crate::lifecycle::{CreateTaskError, LifecycleManager, TaskRequest};
use crate::quota::{HttpQuotaService, QuotaService, Unmetered};
use crate::task::{Task, TaskStatus, ANONYMOUS_USER};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    lifecycle: LifecycleManager,
    backend: ComfyClient,
    config: RwLock<AppConfig>,
}

impl AppState {
    pub fn new(lifecycle: LifecycleManager, backend: ComfyClient, config: AppConfig) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                lifecycle,
                backend,
                config: RwLock::new(config),
            }),
        }
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.inner.lifecycle
    }

    pub async fn config(&self) -> AppConfig {
        self.inner.config.read().await.clone()
    }
}

/// Wire the production component graph out of a loaded config: backend
/// client, engine set, quota service, optional delivery sink, registry and
/// lifecycle manager.
pub fn app_state_with_config(config: AppConfig, data_dir: PathBuf) -> anyhow::Result<AppState> {
    let backend = ComfyClient::new(&config.backend.url)?;
    let engines = EngineSet::standard(backend.clone());

    let quota: Arc<dyn QuotaService> = match &config.quota.service_url {
        Some(url) => Arc::new(HttpQuotaService::new(url)),
        None => {
            info!("no quota service configured; running unmetered");
            Arc::new(Unmetered)
        }
    };

    let delivery = config.telegram.bot_token.as_ref().map(|token| {
        Arc::new(TelegramDelivery::new(&config.telegram.api_url, token))
            as Arc<dyn crate::delivery::DeliverySink>
    });

    let temp_dir = crate::config::resolve_relative_to(&data_dir, &config.paths.temp_dir);
    let output_dir = crate::config::resolve_relative_to(&data_dir, &config.paths.output_dir);

    let lifecycle = LifecycleManager::new(
        Arc::new(crate::task::TaskRegistry::new()),
        engines,
        quota,
        delivery,
        config.cleanup,
        temp_dir,
        output_dir,
    );

    Ok(AppState::new(lifecycle, backend, config))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    pub engine: String,
    #[serde(default)]
    pub motion_type: Option<String>,
    #[serde(default)]
    pub motion_bucket_id: Option<u32>,
    #[serde(default)]
    pub mode: Option<GenerationMode>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub success: bool,
    pub task_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub success: bool,
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub engine: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub image_id: String,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    pub name: String,
    pub modes: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion_types: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion_bucket_range: Option<(u32, u32)>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/upload", post(upload_image))
        .route("/api/generate", post(create_generation))
        .route("/api/task/{task_id}", get(get_task_status))
        .route("/api/download/{task_id}", get(download_video))
        .route("/api/delete/{task_id}", delete(delete_task))
        .route("/api/engines", get(list_engines))
        .route("/api/{*path}", any(api_route_not_found))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn api_route_not_found(Path(path): Path<String>) -> AppError {
    AppError::NotFound(format!("api endpoint not found: /api/{path}"))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let backend = match state.inner.backend.system_stats().await {
        Ok(_) => "online".to_string(),
        Err(err) => {
            warn!(error = %err, "backend health probe failed");
            "offline".to_string()
        }
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        backend,
    })
}

/// Accept a source image into the temp store and hand back the id the
/// generate endpoint expects.
async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let temp_dir = state.inner.lifecycle.temp_dir().to_path_buf();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("image") {
            continue;
        }

        let original_name = field.file_name().unwrap_or("image.jpg").to_string();
        let content_type = field.content_type().map(ToOwned::to_owned);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("failed to read upload: {e}")))?;

        let is_image = match content_type.as_deref() {
            Some(ct) => ct.starts_with("image/"),
            None => mime_guess::from_path(&original_name)
                .first()
                .map(|m| m.type_() == mime_guess::mime::IMAGE)
                .unwrap_or(false),
        };
        if !is_image {
            return Err(AppError::BadRequest(
                "only image files are accepted".to_string(),
            ));
        }
        if bytes.is_empty() {
            return Err(AppError::BadRequest("uploaded file is empty".to_string()));
        }

        let extension = std::path::Path::new(&original_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("jpg")
            .to_ascii_lowercase();
        let image_id = format!(
            "{}-{:08x}.{extension}",
            Utc::now().timestamp_millis(),
            rand::random::<u32>()
        );

        tokio::fs::create_dir_all(&temp_dir)
            .await
            .map_err(|e| AppError::Internal(format!("cannot create upload dir: {e}")))?;
        tokio::fs::write(temp_dir.join(&image_id), &bytes)
            .await
            .map_err(|e| AppError::Internal(format!("cannot store upload: {e}")))?;

        info!(%image_id, size = bytes.len(), "image uploaded");
        return Ok(Json(UploadResponse {
            success: true,
            image_id,
        }));
    }

    Err(AppError::BadRequest("no image field in upload".to_string()))
}

async fn create_generation(
    State(state): State<AppState>,
    Json(payload): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    let user_id = payload
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(ANONYMOUS_USER)
        .to_string();

    // Billable users pass the allowance gate before a record exists;
    // anonymous web use is not metered.
    if user_id != ANONYMOUS_USER {
        match state.inner.lifecycle.quota().check_allowance(&user_id).await {
            Ok(allowance) if !allowance.allowed => {
                let reason = allowance
                    .reason
                    .unwrap_or_else(|| "daily usage limit reached".to_string());
                return Err(AppError::Forbidden(reason));
            }
            Ok(_) => {}
            Err(err) => {
                // A metering outage should not take generation down with it.
                warn!(%user_id, error = %err, "allowance check failed; allowing request");
            }
        }
    }

    let request = TaskRequest {
        user_id,
        engine: payload.engine,
        mode: payload.mode.unwrap_or(GenerationMode::ImageToVideo),
        prompt: payload.prompt,
        image_id: payload.image_id,
        motion_style: payload.motion_type,
        motion_strength: payload.motion_bucket_id,
    };

    let task_id = state.inner.lifecycle.create_task(request)?;

    Ok(Json(GenerateResponse {
        success: true,
        task_id,
    }))
}

async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = state
        .inner
        .lifecycle
        .get_task(&task_id)
        .ok_or_else(|| AppError::NotFound(format!("task not found: {task_id}")))?;

    Ok(Json(task_to_response(&task)))
}

async fn download_video(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, AppError> {
    let task = state
        .inner
        .lifecycle
        .get_task(&task_id)
        .ok_or_else(|| AppError::NotFound(format!("task not found: {task_id}")))?;

    if task.status != TaskStatus::Succeeded {
        return Err(AppError::BadRequest("video is not ready yet".to_string()));
    }

    let video_path = task
        .video_path
        .filter(|p| p.is_file())
        .ok_or_else(|| AppError::NotFound("video file missing or expired".to_string()))?;

    let file = tokio::fs::File::open(&video_path)
        .await
        .map_err(|e| AppError::NotFound(format!("video file unreadable: {e}")))?;

    let filename = task.filename.unwrap_or_else(|| format!("{task_id}.mp4"));
    let body = axum::body::Body::from_stream(ReaderStream::new(file));

    info!(%task_id, "artifact download started");
    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response())
}

async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Json<DeleteResponse> {
    state.inner.lifecycle.delete_task(&task_id);

    Json(DeleteResponse {
        success: true,
        message: "video deleted".to_string(),
    })
}

async fn list_engines(State(state): State<AppState>) -> Json<Vec<EngineInfo>> {
    let engines = state.inner.lifecycle.engines();
    let catalog = engines
        .names()
        .into_iter()
        .filter_map(|name| engines.get(name))
        .map(|engine| {
            let modes = [GenerationMode::ImageToVideo, GenerationMode::TextToVideo]
                .into_iter()
                .filter(|mode| engine.supports(*mode))
                .map(|mode| mode.as_str())
                .collect();
            let name = engine.name();
            EngineInfo {
                name: name.to_string(),
                modes,
                motion_types: (name == motion::ENGINE_NAME).then(motion::supported_motion_styles),
                motion_bucket_range: (name == diffusion::ENGINE_NAME)
                    .then_some(diffusion::MOTION_BUCKET_RANGE),
            }
        })
        .collect();

    Json(catalog)
}

fn task_to_response(task: &Task) -> TaskResponse {
    TaskResponse {
        success: true,
        task_id: task.id.clone(),
        status: task.status,
        progress: task.progress,
        error: task.error.clone(),
        video_url: task.video_url.clone(),
        filename: task.filename.clone(),
        engine: task.engine.clone(),
        created_at: task.created_at,
        updated_at: task.updated_at,
    }
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            success: false,
            error: message,
        });
        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{err:#}"))
    }
}

impl From<CreateTaskError> for AppError {
    fn from(err: CreateTaskError) -> Self {
        match err {
            CreateTaskError::Validation(msg) => AppError::BadRequest(msg),
            CreateTaskError::ImageNotFound(id) => {
                AppError::NotFound(format!("image not found: {id}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comfy::ArtifactRef;
    use crate::config::CleanupConfig;
    use crate::engines::{GenerationEngine, GenerationInput, SubmittedJob};
    use crate::error::EngineError;
    use crate::quota::Allowance;
    use crate::task::TaskRegistry;
    use crate::tracker::ProgressSink;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tower::{Service, ServiceExt};

    struct ScriptedEngine {
        name: &'static str,
        submit_calls: AtomicU32,
        artifact_url: String,
    }

    #[async_trait]
    impl GenerationEngine for ScriptedEngine {
        fn name(&self) -> &'static str {
            self.name
        }

        fn supports(&self, _mode: GenerationMode) -> bool {
            true
        }

        async fn submit(&self, _input: &GenerationInput) -> Result<SubmittedJob, EngineError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            Ok(SubmittedJob {
                prompt_id: "p".to_string(),
                client_id: "c".to_string(),
            })
        }

        async fn await_result(
            &self,
            _job: &SubmittedJob,
            on_progress: ProgressSink<'_>,
        ) -> Result<ArtifactRef, EngineError> {
            on_progress(50);
            Ok(ArtifactRef {
                url: self.artifact_url.clone(),
                filename: "clip.mp4".to_string(),
            })
        }
    }

    struct DenyingQuota;

    #[async_trait]
    impl QuotaService for DenyingQuota {
        async fn check_allowance(&self, _user_id: &str) -> anyhow::Result<Allowance> {
            Ok(Allowance {
                allowed: false,
                remaining: 0,
                daily_limit: 3,
                today_count: 3,
                reason: Some("daily limit reached".to_string()),
            })
        }

        async fn record_usage(
            &self,
            _user_id: &str,
            _event: crate::quota::UsageEvent,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn serve_bytes(body: &'static [u8]) -> String {
        let app = Router::new().route("/view", get(move || async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/view")
    }

    fn test_state_with(
        quota: Arc<dyn QuotaService>,
        artifact_url: &str,
        dirs: &tempfile::TempDir,
    ) -> (AppState, Arc<ScriptedEngine>) {
        let engine = Arc::new(ScriptedEngine {
            name: "mock",
            submit_calls: AtomicU32::new(0),
            artifact_url: artifact_url.to_string(),
        });

        let mut engines = EngineSet::empty();
        engines.register(engine.clone());

        let lifecycle = LifecycleManager::new(
            Arc::new(TaskRegistry::new()),
            engines,
            quota,
            None,
            CleanupConfig {
                chat_delay_secs: 60,
                web_delay_secs: 300,
                evict_delay_secs: 3600,
            },
            dirs.path().join("temp"),
            dirs.path().join("output"),
        );

        let backend = ComfyClient::new("http://localhost:8188").unwrap();
        (
            AppState::new(lifecycle, backend, AppConfig::default()),
            engine,
        )
    }

    async fn send_request(router: &mut Router, request: Request<Body>) -> Response {
        router
            .as_service()
            .ready()
            .await
            .unwrap()
            .call(request)
            .await
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn wait_for_status(
        router: &mut Router,
        task_id: &str,
        expected: &str,
    ) -> serde_json::Value {
        for _ in 0..200 {
            let resp = send_request(router, get_req(&format!("/api/task/{task_id}"))).await;
            let json = body_json(resp).await;
            if json["status"] == expected {
                return json;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never reported status {expected}");
    }

    #[tokio::test]
    async fn unknown_task_is_404() {
        let dirs = tempfile::tempdir().unwrap();
        let (state, _) = test_state_with(Arc::new(Unmetered), "http://unused", &dirs);
        let mut app = app_router(state);

        let resp = send_request(&mut app, get_req("/api/task/nope")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let json = body_json(resp).await;
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn t2v_without_prompt_is_400_and_no_backend_call() {
        let dirs = tempfile::tempdir().unwrap();
        let (state, engine) = test_state_with(Arc::new(Unmetered), "http://unused", &dirs);
        let mut app = app_router(state);

        let resp = send_request(
            &mut app,
            post_json(
                "/api/generate",
                serde_json::json!({"engine": "mock", "mode": "t2v", "prompt": ""}),
            ),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(engine.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn i2v_with_unknown_image_is_404() {
        let dirs = tempfile::tempdir().unwrap();
        let (state, _) = test_state_with(Arc::new(Unmetered), "http://unused", &dirs);
        let mut app = app_router(state);

        let resp = send_request(
            &mut app,
            post_json(
                "/api/generate",
                serde_json::json!({"engine": "mock", "mode": "i2v", "imageId": "missing.jpg"}),
            ),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unsupported_engine_is_400() {
        let dirs = tempfile::tempdir().unwrap();
        let (state, _) = test_state_with(Arc::new(Unmetered), "http://unused", &dirs);
        let mut app = app_router(state);

        let resp = send_request(
            &mut app,
            post_json(
                "/api/generate",
                serde_json::json!({"engine": "not-real", "mode": "t2v", "prompt": "p"}),
            ),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("unsupported engine"));
    }

    #[tokio::test]
    async fn quota_denial_is_403_and_creates_no_task() {
        let dirs = tempfile::tempdir().unwrap();
        let (state, engine) = test_state_with(Arc::new(DenyingQuota), "http://unused", &dirs);
        let registry_view = state.clone();
        let mut app = app_router(state);

        let resp = send_request(
            &mut app,
            post_json(
                "/api/generate",
                serde_json::json!({
                    "engine": "mock", "mode": "t2v", "prompt": "p", "userId": "7001"
                }),
            ),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("daily limit"));
        assert_eq!(engine.submit_calls.load(Ordering::SeqCst), 0);
        assert!(registry_view.lifecycle().registry().is_empty());
    }

    #[tokio::test]
    async fn anonymous_requests_bypass_the_quota_gate() {
        let dirs = tempfile::tempdir().unwrap();
        let url = serve_bytes(b"bytes").await;
        let (state, _) = test_state_with(Arc::new(DenyingQuota), &url, &dirs);
        let mut app = app_router(state);

        let resp = send_request(
            &mut app,
            post_json(
                "/api/generate",
                serde_json::json!({"engine": "mock", "mode": "t2v", "prompt": "p"}),
            ),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn full_round_trip_create_status_download_delete() {
        let dirs = tempfile::tempdir().unwrap();
        let url = serve_bytes(b"fake mp4 bytes").await;
        let (state, _) = test_state_with(Arc::new(Unmetered), &url, &dirs);
        let mut app = app_router(state);

        let resp = send_request(
            &mut app,
            post_json(
                "/api/generate",
                serde_json::json!({"engine": "mock", "mode": "t2v", "prompt": "a harbor"}),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let created = body_json(resp).await;
        assert_eq!(created["success"], true);
        let task_id = created["taskId"].as_str().unwrap().to_string();
        assert!(task_id.starts_with("mock_"));

        let done = wait_for_status(&mut app, &task_id, "SUCCEEDED").await;
        assert_eq!(done["progress"], 100);
        assert_eq!(done["videoUrl"], url.as_str());
        assert_eq!(done["filename"], "clip.mp4");
        assert_eq!(done["engine"], "mock");

        let resp = send_request(&mut app, get_req(&format!("/api/download/{task_id}"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/mp4"
        );
        let disposition = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment"));
        assert!(disposition.contains("clip.mp4"));
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"fake mp4 bytes");

        let resp = send_request(
            &mut app,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/delete/{task_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);

        // Artifact is gone; download now reports the file missing.
        let resp = send_request(&mut app, get_req(&format!("/api/download/{task_id}"))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        // Deleting again is a clean no-op.
        let resp = send_request(
            &mut app,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/delete/{task_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn download_before_completion_is_400() {
        let dirs = tempfile::tempdir().unwrap();
        let (state, _) = test_state_with(Arc::new(Unmetered), "http://unused", &dirs);

        // Seed a still-pending record directly.
        let task = Task::new(
            "mock",
            GenerationMode::TextToVideo,
            ANONYMOUS_USER.to_string(),
            Some("p".to_string()),
            None,
            None,
        );
        let task_id = task.id.clone();
        state.lifecycle().registry().insert(task);

        let mut app = app_router(state);
        let resp = send_request(&mut app, get_req(&format!("/api/download/{task_id}"))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn engine_catalog_lists_registered_engines() {
        let dirs = tempfile::tempdir().unwrap();
        let (state, _) = test_state_with(Arc::new(Unmetered), "http://unused", &dirs);
        let mut app = app_router(state);

        let resp = send_request(&mut app, get_req("/api/engines")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["name"], "mock");
    }

    #[tokio::test]
    async fn unknown_api_route_is_404() {
        let dirs = tempfile::tempdir().unwrap();
        let (state, _) = test_state_with(Arc::new(Unmetered), "http://unused", &dirs);
        let mut app = app_router(state);

        let resp = send_request(&mut app, get_req("/api/does/not/exist")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
