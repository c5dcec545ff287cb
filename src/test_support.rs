//! Scripted collaborators shared by unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::agent::{Agent, AgentContext, AgentOutcome};
use crate::audit::{ChangeType, ChangedArtifact};
use crate::checkpoint::ResourceUsage;
use crate::errors::{AgentError, RunnerError};
use crate::policy::{CheckStep, Policy};
use crate::verify::{CheckRun, CommandRunner, VerificationEngine};

pub const TEST_POLICY: &str = r#"
version = "1"

[[guardrails]]
name = "private-key"
pattern = "BEGIN [A-Z ]*PRIVATE KEY"
target = "content"

[[checks]]
name = "tests"
command = "true"

[verification]
infra_retries = 0
"#;

/// Agent that replays scripted outcomes. Once the script runs out it keeps
/// changing a file so the loop never stagnates by accident.
#[derive(Default)]
pub struct ScriptedAgent {
    script: Mutex<VecDeque<Result<AgentOutcome, AgentError>>>,
    calls: Mutex<Vec<AgentContext>>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<Result<AgentOutcome, AgentError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<AgentContext> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn invoke(&self, ctx: &AgentContext) -> Result<AgentOutcome, AgentError> {
        self.calls.lock().unwrap().push(ctx.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(changed(&format!("src/cycle{}.rs", ctx.iteration), "fn x() {}\n")))
    }
}

/// An outcome that changed one file.
pub fn changed(path: &str, added: &str) -> AgentOutcome {
    AgentOutcome {
        raw_output: format!("edited {}", path),
        changed_artifacts: vec![ChangedArtifact::new(path, ChangeType::Modified).with_added(added)],
        declared_complete: false,
        usage: ResourceUsage {
            agent_invocations: 1,
            cost_usd: 0.1,
            ..Default::default()
        },
        snapshot_before: None,
        snapshot_after: None,
        workdir: None,
    }
}

/// An outcome with no changes.
pub fn unchanged() -> AgentOutcome {
    AgentOutcome {
        raw_output: "nothing to do".into(),
        usage: ResourceUsage {
            agent_invocations: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Runner that answers each check with the next scripted pass/fail; passes
/// once the script is exhausted.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<bool>>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<bool>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        step: &CheckStep,
        _artifacts: &[ChangedArtifact],
        _workdir: Option<&Path>,
    ) -> Result<CheckRun, RunnerError> {
        let passed = self.script.lock().unwrap().pop_front().unwrap_or(true);
        Ok(CheckRun {
            passed,
            exit_code: Some(if passed { 0 } else { 1 }),
            log: format!("{} {}", step.name, if passed { "ok" } else { "failed" }),
        })
    }
}

pub fn engine(warden_dir: &Path, runner: ScriptedRunner) -> Arc<VerificationEngine> {
    let policy = Arc::new(Policy::parse(TEST_POLICY).unwrap());
    Arc::new(VerificationEngine::new(
        policy,
        Arc::new(runner),
        warden_dir.to_path_buf(),
    ))
}
