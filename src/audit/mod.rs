//! Audit trail: per-run task logs and per-verdict artifacts.
//!
//! ```text
//! .warden/audit/
//! ├── current-run.json          # run in progress
//! ├── runs/<ts>_<id>.json       # finished runs
//! └── verdicts/<task>/<role|_task>/cycle-NNNN.json
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::router::RoutingDecision;
use crate::task::BlockReason;

pub mod logger;
pub mod verdict;

pub use logger::AuditLogger;
pub use verdict::{VerdictAudit, write_verdict_audit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// One file touched by an agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedArtifact {
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    pub change_type: ChangeType,
    pub lines_added: usize,
    pub lines_removed: usize,
    /// Added lines, scanned by content guardrails. Not persisted.
    #[serde(skip)]
    pub added_text: String,
}

impl ChangedArtifact {
    pub fn new(path: &str, change_type: ChangeType) -> Self {
        Self {
            path: path.to_string(),
            change_type,
            lines_added: 0,
            lines_removed: 0,
            added_text: String::new(),
        }
    }

    /// Builder used by tests and fake agents: sets added text and line count.
    pub fn with_added(mut self, text: &str) -> Self {
        self.lines_added = text.lines().count();
        self.added_text = text.to_string();
        self
    }

    pub fn lines_changed(&self) -> usize {
        self.lines_added + self.lines_removed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub config: RunConfig,
    pub tasks: Vec<TaskAudit>,
}

impl AuditRun {
    pub fn new(config: RunConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            config,
            tasks: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub project_dir: PathBuf,
    pub queue_file: PathBuf,
    pub limit: Option<usize>,
    pub max_iterations: Option<u32>,
    pub dry_run: bool,
    pub policy_version: String,
    pub run_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAudit {
    pub task_id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<RoutingDecision>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: TaskAuditOutcome,
    pub iterations_used: u32,
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict_ref: Option<String>,
    #[serde(default)]
    pub changed_paths: Vec<String>,
}

impl TaskAudit {
    pub fn new(task_id: &str, description: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            description: description.to_string(),
            decision: None,
            started_at: Utc::now(),
            ended_at: None,
            outcome: TaskAuditOutcome::InProgress,
            iterations_used: 0,
            cost_usd: 0.0,
            verdict_ref: None,
            changed_paths: Vec::new(),
        }
    }

    pub fn finish(&mut self, outcome: TaskAuditOutcome) {
        self.ended_at = Some(Utc::now());
        self.outcome = outcome;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TaskAuditOutcome {
    InProgress,
    Completed { iteration: u32 },
    Blocked { reason: BlockReason },
    /// Left pending because the run mode did not allow it (e.g. multi-agent in safe mode).
    Deferred,
    /// Stopped by the kill switch; resumable.
    Interrupted,
    /// Routing only, nothing executed.
    DryRun,
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_run_new() {
        let config = RunConfig {
            project_dir: PathBuf::from("."),
            queue_file: PathBuf::from(".warden/queue.json"),
            limit: Some(3),
            max_iterations: None,
            dry_run: false,
            policy_version: "1+abc".into(),
            run_mode: "normal".into(),
            base_commit: None,
        };
        let run = AuditRun::new(config);
        assert!(run.ended_at.is_none());
        assert!(run.tasks.is_empty());
    }

    #[test]
    fn test_artifact_added_text_not_persisted() {
        let artifact = ChangedArtifact::new("src/a.rs", ChangeType::Modified)
            .with_added("let key = \"secret\";\nfn x() {}\n");
        assert_eq!(artifact.lines_added, 2);
        let json = serde_json::to_string(&artifact).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"modified\""));
    }
}
