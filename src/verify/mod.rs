//! Policy verification: the only component allowed to issue verdicts.
//!
//! - `engine` runs the fail-fast pipeline (guardrails, scope, ordered checks)
//! - `runner` executes check commands behind the `CommandRunner` seam
//!
//! A verdict is a pure function of (policy version, changed artifacts, step
//! outcomes); its `fingerprint` hashes exactly those inputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod engine;
pub mod runner;

pub use engine::{VerificationEngine, VerificationRequest};
pub use runner::{CheckRun, CommandRunner, ShellRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictKind {
    Pass,
    Fail,
    Blocked,
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictKind::Pass => write!(f, "PASS"),
            VerdictKind::Fail => write!(f, "FAIL"),
            VerdictKind::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// Why a verdict is BLOCKED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockCause {
    /// A forbidden pattern matched an artifact path or added content.
    Guardrail,
    /// Change size or protected-path thresholds were exceeded.
    Scope,
    /// The verification tooling failed to run, distinct from a failing check.
    Infrastructure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Passed,
    Failed,
    /// The runner could not execute the step.
    Error,
    /// Not reached because an earlier step failed.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Position in the policy's check list.
    pub order: usize,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepResult {
    pub fn skipped(order: usize) -> Self {
        Self {
            order,
            outcome: StepOutcome::Skipped,
            exit_code: None,
            coverage: None,
            attempts: 0,
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub kind: VerdictKind,
    pub steps: BTreeMap<String, StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub matched_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<BlockCause>,
    pub policy_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_ref: Option<String>,
    pub fingerprint: String,
    /// Tail of the failing step's output, used as agent feedback.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_tail: String,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        self.kind == VerdictKind::Pass
    }

    pub fn summary(&self) -> VerdictSummary {
        VerdictSummary {
            kind: self.kind,
            failed_step: self.failed_step.clone(),
            reason: self.reason.clone(),
            cause: self.cause,
            policy_version: self.policy_version.clone(),
            audit_ref: self.audit_ref.clone(),
        }
    }

    /// One-line description for logs and checkpoints.
    pub fn describe(&self) -> String {
        match self.kind {
            VerdictKind::Pass => "PASS".to_string(),
            VerdictKind::Fail => format!(
                "FAIL at '{}': {}",
                self.failed_step.as_deref().unwrap_or("?"),
                self.reason.as_deref().unwrap_or("no reason given")
            ),
            VerdictKind::Blocked => {
                let mut s = format!(
                    "BLOCKED: {}",
                    self.reason.as_deref().unwrap_or("no reason given")
                );
                if !self.matched_patterns.is_empty() {
                    s.push_str(&format!(" [{}]", self.matched_patterns.join(", ")));
                }
                s
            }
        }
    }
}

/// Compact verdict record stored in checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictSummary {
    pub kind: VerdictKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<BlockCause>,
    pub policy_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_ref: Option<String>,
}
