//! Task definition and lifecycle state machine.
//!
//! This module provides:
//! - `Task`, the queue entry that the driver consumes and writes back
//! - `TaskStatus` with its monotonic transition rules
//! - `Complexity` tiers used by routing
//! - `BlockReason`, the structured reason attached to every blocked task
//! - `SpecialistRecord`, the per-role report for multi-agent tasks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::router::{RoutingAnalysis, RoutingDecision};
use crate::verify::VerdictKind;

/// Lifecycle status of a task. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Blocked)
    }

    /// Whether moving from `self` to `next` respects monotonicity.
    ///
    /// Re-writing `in_progress` is allowed so counters can be refreshed;
    /// nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Pending) => true,
            (Self::Pending, Self::InProgress | Self::Blocked) => true,
            (Self::InProgress, Self::InProgress | Self::Completed | Self::Blocked) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Complexity category, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Trivial,
    Low,
    Medium,
    High,
    Critical,
}

impl Complexity {
    /// The two most severe tiers route to multi-agent handling.
    pub fn is_top_tier(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trivial => "trivial",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Category of a terminal block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Two consecutive cycles produced no changes.
    Stagnation,
    /// Iteration budget spent without a PASS.
    BudgetExhausted,
    /// Guardrail match or scope/threshold breach.
    PolicyViolation,
    /// The verification tooling itself kept failing.
    Infrastructure,
    /// The router decided the task must not run.
    Routing,
    /// A specialist role errored, panicked or timed out.
    RoleFailure,
    /// Some specialist roles passed, others did not.
    PartialSuccess,
    /// The integration-level verification pass did not succeed.
    Integration,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stagnation => "stagnation",
            Self::BudgetExhausted => "budget exhausted",
            Self::PolicyViolation => "policy violation",
            Self::Infrastructure => "verification infrastructure error",
            Self::Routing => "routing",
            Self::RoleFailure => "role failure",
            Self::PartialSuccess => "partial success",
            Self::Integration => "integration verification",
        };
        write!(f, "{}", s)
    }
}

/// Structured, human-readable reason for a blocked task or role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockReason {
    pub kind: BlockKind,
    pub message: String,
    /// Audit artifact of the verdict that caused the block, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_ref: Option<String>,
}

impl BlockReason {
    pub fn new(kind: BlockKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            audit_ref: None,
        }
    }

    pub fn with_audit_ref(mut self, audit_ref: Option<String>) -> Self {
        self.audit_ref = audit_ref;
        self
    }

    pub fn stagnation() -> Self {
        Self::new(
            BlockKind::Stagnation,
            "stagnation: no changes for two consecutive cycles",
        )
    }

    pub fn budget_exhausted(budget: u32) -> Self {
        Self::new(
            BlockKind::BudgetExhausted,
            format!("budget exhausted after {} iteration(s) without PASS", budget),
        )
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref audit) = self.audit_ref {
            write!(f, " (audit: {})", audit)?;
        }
        Ok(())
    }
}

/// Per-role record of a multi-agent task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistRecord {
    pub role: String,
    pub status: TaskStatus,
    pub iterations_used: u32,
    pub budget: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<VerdictKind>,
    #[serde(default)]
    pub cost_usd: f64,
    /// Advisory roles do not gate the overall verdict under `gating_roles` aggregation.
    #[serde(default)]
    pub advisory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<BlockReason>,
}

impl SpecialistRecord {
    pub fn new(role: &str, budget: u32, advisory: bool) -> Self {
        Self {
            role: role.to_string(),
            status: TaskStatus::Pending,
            iterations_used: 0,
            budget,
            started_at: None,
            ended_at: None,
            verdict: None,
            cost_usd: 0.0,
            advisory,
            reason: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == TaskStatus::Completed && self.verdict == Some(VerdictKind::Pass)
    }
}

/// A unit of work pulled from the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    /// Type tag (e.g. "fix", "feature", "refactor")
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub target_files: Vec<String>,
    #[serde(default)]
    pub test_files: Vec<String>,
    /// Marker the agent prints when it believes the task is done.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_budget: Option<u32>,
    #[serde(default)]
    pub iterations_used: u32,

    // Routing inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_override: Option<RoutingDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_estimate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default)]
    pub type_flags: Vec<String>,

    // Written back by the driver
    /// Frozen once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingAnalysis>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specialists: Vec<SpecialistRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<BlockReason>,
}

impl Task {
    pub fn new(id: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            task_type: None,
            status: TaskStatus::Pending,
            priority: 0,
            target_files: Vec::new(),
            test_files: Vec::new(),
            completion_marker: None,
            iteration_budget: None,
            iterations_used: 0,
            routing_override: None,
            value_estimate: None,
            complexity: None,
            type_flags: Vec::new(),
            routing: None,
            specialists: Vec::new(),
            verdict_ref: None,
            block_reason: None,
        }
    }

    pub fn with_type(mut self, task_type: &str) -> Self {
        self.task_type = Some(task_type.to_string());
        self
    }

    pub fn with_budget(mut self, budget: u32) -> Self {
        self.iteration_budget = Some(budget);
        self
    }

    pub fn with_value_estimate(mut self, value: f64) -> Self {
        self.value_estimate = Some(value);
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = Some(complexity);
        self
    }

    /// Effective budget: the task's own, capped by the driver's maximum.
    pub fn effective_budget(&self, default_budget: u32, max_iterations: Option<u32>) -> u32 {
        let budget = self.iteration_budget.unwrap_or(default_budget);
        match max_iterations {
            Some(max) => budget.min(max),
            None => budget,
        }
    }

    /// True when none of the routing metadata is present.
    pub fn lacks_routing_metadata(&self) -> bool {
        self.routing_override.is_none()
            && self.task_type.is_none()
            && self.complexity.is_none()
            && self.value_estimate.is_none()
            && self.type_flags.is_empty()
    }

    pub fn completion_marker(&self) -> &str {
        self.completion_marker.as_deref().unwrap_or("DONE")
    }
}
