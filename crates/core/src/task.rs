use std::path::PathBuf;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::engines::GenerationMode;

/// Owner id used for web requests that carry no chat identity. Anonymous
/// tasks skip quota recording and chat delivery.
pub const ANONYMOUS_USER: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    /// Position along the forward-only lifecycle. Transitions may only
    /// increase this rank.
    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::Succeeded | TaskStatus::Failed => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub engine: String,
    pub mode: GenerationMode,
    pub prompt: Option<String>,
    /// Engine-specific motion/style parameter, as the caller spelled it.
    pub motion: Option<String>,
    pub status: TaskStatus,
    /// 0–100 estimate; only meaningful while running.
    pub progress: u8,
    /// Remote artifact URL once the backend produced one.
    pub video_url: Option<String>,
    /// Artifact filename as the backend stored it.
    pub filename: Option<String>,
    /// Local copy of the artifact, owned by this task until cleanup.
    pub video_path: Option<PathBuf>,
    /// Source image for i2v tasks, owned by this task until cleanup.
    pub image_path: Option<PathBuf>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        engine: &str,
        mode: GenerationMode,
        user_id: String,
        prompt: Option<String>,
        motion: Option<String>,
        image_path: Option<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_task_id(engine, now),
            user_id,
            engine: engine.to_string(),
            mode,
            prompt,
            motion,
            status: TaskStatus::Pending,
            progress: 0,
            video_url: None,
            filename: None,
            video_path: None,
            image_path,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id == ANONYMOUS_USER
    }
}

/// `<engine>_<unix-millis>_<random>` — sortable by creation time and
/// greppable by engine in the logs.
fn new_task_id(engine: &str, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{engine}_{}_{}", now.timestamp_millis(), &suffix[..9])
}

/// In-memory task store. The only shared mutable state in the core; reads
/// (status queries) run concurrently with lifecycle mutation, which the
/// map's per-shard locking makes safe.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// Read-only snapshot of one task.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Task> {
        self.tasks.remove(id).map(|(_, task)| task)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Apply a mutation to a live task. A miss is a no-op (the record may
    /// have been deleted mid-flight) and reports `false`.
    pub fn update<F>(&self, id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Task),
    {
        match self.tasks.get_mut(id) {
            Some(mut entry) => {
                mutate(entry.value_mut());
                entry.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Move a task forward through the lifecycle. Backward transitions and
    /// mutations of terminal records are rejected and logged; late signals
    /// for settled tasks are expected under the polling fallback.
    pub fn transition(&self, id: &str, next: TaskStatus) -> bool {
        match self.tasks.get_mut(id) {
            Some(mut entry) => {
                let current = entry.status;
                if current.is_terminal() || next.rank() <= current.rank() {
                    warn!(
                        task_id = id,
                        from = ?current,
                        to = ?next,
                        "ignoring non-forward status transition"
                    );
                    return false;
                }
                entry.status = next;
                entry.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Progress updates only apply to running tasks; anything later owns
    /// its own progress value (100 on success, frozen on failure).
    pub fn set_progress(&self, id: &str, progress: u8) {
        if let Some(mut entry) = self.tasks.get_mut(id) {
            if entry.status == TaskStatus::Running {
                entry.progress = progress.min(100);
                entry.updated_at = Utc::now();
            }
        }
    }
}
