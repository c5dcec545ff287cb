//! Task queue backed by a JSON file (`{"tasks": [...]}`).
//!
//! The engine only needs two operations from the queue: fetch the next task to
//! work on and record a status change. Writes replace the file atomically
//! (temp file + rename) so a crash never leaves a half-written queue.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::QueueError;
use crate::router::RoutingAnalysis;
use crate::task::{BlockReason, SpecialistRecord, Task, TaskStatus};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueFile {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A status transition plus the state written back with it.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: TaskStatus,
    pub iterations_used: Option<u32>,
    pub routing: Option<RoutingAnalysis>,
    pub specialists: Option<Vec<SpecialistRecord>>,
    pub verdict_ref: Option<String>,
    pub block_reason: Option<BlockReason>,
}

impl StatusUpdate {
    pub fn to(status: TaskStatus) -> Self {
        Self {
            status,
            iterations_used: None,
            routing: None,
            specialists: None,
            verdict_ref: None,
            block_reason: None,
        }
    }

    pub fn with_iterations(mut self, iterations_used: u32) -> Self {
        self.iterations_used = Some(iterations_used);
        self
    }

    pub fn with_routing(mut self, routing: RoutingAnalysis) -> Self {
        self.routing = Some(routing);
        self
    }

    pub fn with_specialists(mut self, specialists: Vec<SpecialistRecord>) -> Self {
        self.specialists = Some(specialists);
        self
    }

    pub fn with_verdict_ref(mut self, verdict_ref: Option<String>) -> Self {
        self.verdict_ref = verdict_ref;
        self
    }

    pub fn with_block_reason(mut self, reason: BlockReason) -> Self {
        self.block_reason = Some(reason);
        self
    }
}

pub trait TaskQueue: Send + Sync {
    /// Next task to work on, ignoring ids in `skip`.
    ///
    /// Resumable `in_progress` tasks come first, then the highest-priority
    /// pending task; ties keep queue order.
    fn next_pending(&self, skip: &[String]) -> Result<Option<Task>, QueueError>;

    /// Apply a status transition. Back-transitions are rejected.
    fn mark_status(&self, id: &str, update: StatusUpdate) -> Result<Task, QueueError>;
}

pub struct JsonFileQueue {
    path: PathBuf,
    state: Mutex<QueueFile>,
}

impl JsonFileQueue {
    pub fn load(path: &Path) -> Result<Self, QueueError> {
        let content = std::fs::read_to_string(path).map_err(|source| QueueError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: QueueFile =
            serde_json::from_str(&content).map_err(|source| QueueError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut seen = std::collections::HashSet::new();
        for task in &file.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(QueueError::DuplicateTask(task.id.clone()));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of every task in queue order.
    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.clone()
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().tasks.iter().find(|t| t.id == id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueFile> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self, file: &QueueFile) -> Result<(), QueueError> {
        let write_err = |source| QueueError::Write {
            path: self.path.clone(),
            source,
        };
        let content = serde_json::to_string_pretty(file)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}

impl TaskQueue for JsonFileQueue {
    fn next_pending(&self, skip: &[String]) -> Result<Option<Task>, QueueError> {
        let state = self.lock();
        let candidates = state.tasks.iter().filter(|t| !skip.contains(&t.id));

        if let Some(task) = candidates
            .clone()
            .find(|t| t.status == TaskStatus::InProgress)
        {
            return Ok(Some(task.clone()));
        }

        let mut best: Option<&Task> = None;
        for task in candidates.filter(|t| t.status == TaskStatus::Pending) {
            // Strictly greater keeps queue order on ties.
            if best.is_none_or(|b| task.priority > b.priority) {
                best = Some(task);
            }
        }
        Ok(best.cloned())
    }

    fn mark_status(&self, id: &str, update: StatusUpdate) -> Result<Task, QueueError> {
        let mut state = self.lock();
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| QueueError::UnknownTask(id.to_string()))?;

        if !task.status.can_transition_to(update.status) {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                from: task.status,
                to: update.status,
            });
        }

        task.status = update.status;
        if let Some(n) = update.iterations_used {
            task.iterations_used = n;
        }
        if let Some(routing) = update.routing {
            if task.routing.is_none() {
                task.routing = Some(routing);
            } else if task.routing.as_ref() != Some(&routing) {
                tracing::warn!(task = %id, "routing already recorded; keeping the original analysis");
            }
        }
        if let Some(specialists) = update.specialists {
            task.specialists = specialists;
        }
        if update.verdict_ref.is_some() {
            task.verdict_ref = update.verdict_ref;
        }
        if update.block_reason.is_some() {
            task.block_reason = update.block_reason;
        }

        let updated = task.clone();
        self.write(&state)?;
        Ok(updated)
    }
}
