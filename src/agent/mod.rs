//! The coding-agent boundary.
//!
//! The engine only ever sees typed values: an `AgentContext` goes in, an
//! `AgentOutcome` (with `declared_complete` as a plain boolean) comes out.
//! Parsing of agent output, including completion markers, stays inside the
//! adapter in `command`.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::audit::ChangedArtifact;
use crate::checkpoint::{CycleSummary, ResourceUsage};
use crate::errors::AgentError;
use crate::task::Task;

pub mod command;
pub mod prompt;
pub mod stream;

pub use command::{CommandAgent, CommandAgentConfig};

/// Everything an agent invocation is told.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub task_id: String,
    pub role: Option<String>,
    pub description: String,
    pub task_type: Option<String>,
    pub target_files: Vec<String>,
    pub test_files: Vec<String>,
    pub completion_marker: String,
    /// 1-based cycle number.
    pub iteration: u32,
    pub budget: u32,
    /// Failure reason and log tail from the previous verdict.
    pub feedback: Option<String>,
    /// Advisory only. Never consulted for verdicts or routing.
    pub hints: Vec<String>,
    pub recent: Vec<CycleSummary>,
}

impl AgentContext {
    pub fn for_task(task: &Task, role: Option<&str>, iteration: u32, budget: u32) -> Self {
        Self {
            task_id: task.id.clone(),
            role: role.map(String::from),
            description: task.description.clone(),
            task_type: task.task_type.clone(),
            target_files: task.target_files.clone(),
            test_files: task.test_files.clone(),
            completion_marker: task.completion_marker().to_string(),
            iteration,
            budget,
            feedback: None,
            hints: Vec::new(),
            recent: Vec::new(),
        }
    }

    /// Label used for snapshots and log file names.
    pub fn label(&self) -> String {
        match self.role {
            Some(ref role) => format!("{}-{}-iter-{}", self.task_id, role, self.iteration),
            None => format!("{}-iter-{}", self.task_id, self.iteration),
        }
    }
}

/// What one invocation produced.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    pub raw_output: String,
    pub changed_artifacts: Vec<ChangedArtifact>,
    pub declared_complete: bool,
    pub usage: ResourceUsage,
    pub snapshot_before: Option<String>,
    pub snapshot_after: Option<String>,
    /// Where the agent ran, when that is not the project root. Checks for
    /// this outcome run there too.
    pub workdir: Option<PathBuf>,
}

#[async_trait]
pub trait Agent: Send + Sync {
    async fn invoke(&self, ctx: &AgentContext) -> Result<AgentOutcome, AgentError>;

    /// Called before a role's loop is launched. Reopening a role that already
    /// has a workspace must keep its work.
    async fn open_role(&self, _task_id: &str, _role: &str) -> Result<(), AgentError> {
        Ok(())
    }

    /// Called once a role is finished for good. `keep` is true when the role
    /// passed and its changes belong in the shared tree.
    async fn close_role(&self, _task_id: &str, _role: &str, _keep: bool) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Source of advisory hints (prior solutions, knowledge lookups).
pub trait HintSource: Send + Sync {
    fn hints(&self, task: &Task, role: Option<&str>) -> Vec<String>;
}

/// Default hint source: no hints.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHints;

impl HintSource for NoHints {
    fn hints(&self, _task: &Task, _role: Option<&str>) -> Vec<String> {
        Vec::new()
    }
}
