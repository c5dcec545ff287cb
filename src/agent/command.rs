//! Agent adapter that drives an external CLI coding agent.
//!
//! The prompt goes to the child's stdin; stdout is read as `stream-json`
//! events. Completion-marker detection happens here and nowhere else.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::agent::prompt::build_prompt;
use crate::agent::stream::{ContentBlock, StreamEvent, describe_tool_use};
use crate::agent::{Agent, AgentContext, AgentOutcome};
use crate::checkpoint::ResourceUsage;
use crate::errors::AgentError;
use crate::run_mode::RunModeSource;
use crate::tracker::{GitTracker, RoleWorktrees};

#[derive(Debug, Clone)]
pub struct CommandAgentConfig {
    pub command: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// Prompt and output logs land here.
    pub log_dir: PathBuf,
    pub timeout: Duration,
    /// How long an in-flight invocation may continue after the run mode
    /// stops allowing work.
    pub grace: Duration,
    pub poll_interval: Duration,
    /// Root for per-role git worktrees. `None` runs roles in `workdir`.
    pub worktrees: Option<PathBuf>,
}

/// Where one namespace's agent runs and how its changes are diffed.
#[derive(Clone)]
struct Workspace {
    dir: PathBuf,
    tracker: Arc<Mutex<GitTracker>>,
    isolated: bool,
}

pub struct CommandAgent {
    config: CommandAgentConfig,
    tracker: Arc<Mutex<GitTracker>>,
    run_mode: Arc<dyn RunModeSource>,
    worktrees: Option<RoleWorktrees>,
    /// Open role workspaces, keyed like `carried`.
    roles: Mutex<HashMap<String, Workspace>>,
    /// Pre-invocation snapshots of cycles that errored, per namespace. The next
    /// invocation diffs from there so changes made by a failed cycle are still
    /// verified.
    carried: Mutex<HashMap<String, String>>,
}

struct StreamOutput {
    text: String,
    final_result: Option<String>,
    is_error: bool,
    cost_usd: Option<f64>,
    input_tokens: u64,
    output_tokens: u64,
}

impl CommandAgent {
    pub fn new(
        config: CommandAgentConfig,
        tracker: Arc<Mutex<GitTracker>>,
        run_mode: Arc<dyn RunModeSource>,
    ) -> Self {
        let worktrees = config
            .worktrees
            .as_ref()
            .map(|root| RoleWorktrees::new(&config.workdir, root));
        Self {
            config,
            tracker,
            run_mode,
            worktrees,
            roles: Mutex::new(HashMap::new()),
            carried: Mutex::new(HashMap::new()),
        }
    }

    fn prompt_file(&self, ctx: &AgentContext) -> PathBuf {
        self.config.log_dir.join(format!("{}-prompt.md", ctx.label()))
    }

    fn output_file(&self, ctx: &AgentContext) -> PathBuf {
        self.config.log_dir.join(format!("{}-output.log", ctx.label()))
    }

    fn carry_key(ctx: &AgentContext) -> String {
        match ctx.role {
            Some(ref role) => role_key(&ctx.task_id, role),
            None => ctx.task_id.clone(),
        }
    }

    fn shared(&self) -> Workspace {
        Workspace {
            dir: self.config.workdir.clone(),
            tracker: Arc::clone(&self.tracker),
            isolated: false,
        }
    }

    /// The role's own worktree when isolation is on, else the shared tree.
    async fn workspace(&self, task_id: &str, role: Option<&str>) -> Result<Workspace, AgentError> {
        let (Some(role), Some(worktrees)) = (role, self.worktrees.as_ref()) else {
            return Ok(self.shared());
        };
        let key = role_key(task_id, role);
        let mut roles = self.roles.lock().await;
        if let Some(ws) = roles.get(&key) {
            return Ok(ws.clone());
        }

        let dir = {
            let shared = self.tracker.lock().await;
            worktrees
                .prepare(&shared, task_id, role)
                .map_err(|e| AgentError::Tracker(format!("{:#}", e)))?
        };
        let tracker = GitTracker::new(&dir).map_err(|e| AgentError::Tracker(format!("{:#}", e)))?;
        let ws = Workspace {
            dir,
            tracker: Arc::new(Mutex::new(tracker)),
            isolated: true,
        };
        roles.insert(key, ws.clone());
        Ok(ws)
    }

    async fn snapshot(ws: &Workspace, label: &str) -> Result<String, AgentError> {
        let tracker = ws.tracker.lock().await;
        tracker
            .snapshot(label)
            .map_err(|e| AgentError::Tracker(e.to_string()))
    }

    async fn run_child(
        &self,
        ctx: &AgentContext,
        prompt: &str,
        workdir: &Path,
    ) -> Result<StreamOutput, AgentError> {
        let stderr_log = std::fs::File::create(
            self.config
                .log_dir
                .join(format!("{}-stderr.log", ctx.label())),
        )?;

        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr_log)
            .kill_on_drop(true)
            .spawn()
            .map_err(AgentError::Spawn)?;

        tracing::debug!(
            task = %ctx.task_id,
            pid = child.id().unwrap_or(0),
            chars = prompt.len(),
            "agent process spawned"
        );

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let deadline = tokio::time::Instant::now() + self.config.timeout;
        let output = self.read_stream(&mut child, deadline).await?;

        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                child.kill().await.ok();
                return Err(AgentError::Timeout {
                    secs: self.config.timeout.as_secs(),
                });
            }
        };

        match status.code() {
            Some(0) => Ok(output),
            Some(code) => Err(AgentError::Crashed { exit_code: code }),
            None => Err(AgentError::Crashed { exit_code: -1 }),
        }
    }

    async fn read_stream(
        &self,
        child: &mut Child,
        deadline: tokio::time::Instant,
    ) -> Result<StreamOutput, AgentError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Io(std::io::Error::other("agent stdout not captured")))?;
        let mut reader = BufReader::new(stdout).lines();

        let mut out = StreamOutput {
            text: String::new(),
            final_result: None,
            is_error: false,
            cost_usd: None,
            input_tokens: 0,
            output_tokens: 0,
        };

        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut stop_at: Option<Instant> = None;

        loop {
            tokio::select! {
                line = reader.next_line() => {
                    match line? {
                        Some(line) => handle_line(&line, &mut out),
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    child.kill().await.ok();
                    return Err(AgentError::Timeout { secs: self.config.timeout.as_secs() });
                }
                _ = poll.tick() => {
                    let mode = self.run_mode.current();
                    if mode.allows_single_agent() {
                        stop_at = None;
                        continue;
                    }
                    let limit = *stop_at.get_or_insert_with(|| Instant::now() + self.config.grace);
                    if Instant::now() >= limit {
                        tracing::warn!(%mode, "terminating agent after run mode change");
                        child.kill().await.ok();
                        return Err(AgentError::Terminated { mode: mode.to_string() });
                    }
                }
            }
        }

        Ok(out)
    }
}

fn handle_line(line: &str, out: &mut StreamOutput) {
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<StreamEvent>(line) {
        Ok(StreamEvent::Assistant { message, .. }) => {
            for block in message.content {
                match block {
                    ContentBlock::ToolUse { name, input, .. } => {
                        tracing::debug!(tool = %describe_tool_use(&name, &input), "agent tool use");
                    }
                    ContentBlock::Text { text } => {
                        out.text.push_str(&text);
                        out.text.push('\n');
                    }
                    ContentBlock::Other => {}
                }
            }
        }
        Ok(StreamEvent::Result {
            result,
            is_error,
            total_cost_usd,
            usage,
            ..
        }) => {
            out.final_result = result;
            out.is_error = is_error;
            out.cost_usd = total_cost_usd;
            if let Some(usage) = usage {
                out.input_tokens = usage.input_tokens;
                out.output_tokens = usage.output_tokens;
            }
        }
        Ok(StreamEvent::User { .. }) | Ok(StreamEvent::System { .. }) => {}
        Err(_) => {
            // Plain text output from agents that do not stream JSON.
            out.text.push_str(line);
            out.text.push('\n');
        }
    }
}

#[async_trait]
impl Agent for CommandAgent {
    async fn invoke(&self, ctx: &AgentContext) -> Result<AgentOutcome, AgentError> {
        let ws = self.workspace(&ctx.task_id, ctx.role.as_deref()).await?;
        let key = Self::carry_key(ctx);
        let before = match self.carried.lock().await.remove(&key) {
            Some(sha) => sha,
            None => Self::snapshot(&ws, &format!("{} before", ctx.label())).await?,
        };

        let prompt = build_prompt(ctx);
        std::fs::create_dir_all(&self.config.log_dir)?;
        std::fs::write(self.prompt_file(ctx), &prompt)?;

        let start = Instant::now();
        let output = match self.run_child(ctx, &prompt, &ws.dir).await {
            Ok(output) => output,
            Err(e) => {
                self.carried.lock().await.insert(key, before);
                return Err(e);
            }
        };
        let elapsed = start.elapsed();

        if output.is_error {
            tracing::warn!(task = %ctx.task_id, "agent reported an error result");
        }

        let raw_output = output.final_result.unwrap_or(output.text);
        std::fs::write(self.output_file(ctx), &raw_output)?;

        let promise_tag = format!("<promise>{}</promise>", ctx.completion_marker);
        let declared_complete = raw_output.contains(&promise_tag);

        let after = Self::snapshot(&ws, &format!("{} after", ctx.label())).await?;
        let changed_artifacts = {
            let tracker = ws.tracker.lock().await;
            tracker
                .changes_between(&before, &after)
                .map_err(|e| AgentError::Tracker(e.to_string()))?
        };

        tracing::debug!(
            task = %ctx.task_id,
            cycle = ctx.iteration,
            files = changed_artifacts.len(),
            declared_complete,
            "agent invocation finished"
        );

        Ok(AgentOutcome {
            raw_output,
            changed_artifacts,
            declared_complete,
            usage: ResourceUsage {
                agent_invocations: 1,
                verification_runs: 0,
                input_tokens: output.input_tokens,
                output_tokens: output.output_tokens,
                cost_usd: output.cost_usd.unwrap_or(0.0),
                elapsed_ms: elapsed.as_millis() as u64,
            },
            snapshot_before: Some(before),
            snapshot_after: Some(after),
            workdir: ws.isolated.then_some(ws.dir),
        })
    }

    async fn open_role(&self, task_id: &str, role: &str) -> Result<(), AgentError> {
        self.workspace(task_id, Some(role)).await.map(|_| ())
    }

    async fn close_role(&self, task_id: &str, role: &str, keep: bool) -> Result<(), AgentError> {
        let Some(ref worktrees) = self.worktrees else {
            return Ok(());
        };
        let key = role_key(task_id, role);
        self.roles.lock().await.remove(&key);
        self.carried.lock().await.remove(&key);

        // Holding the shared tracker keeps single-agent snapshots out of the merge.
        let _shared = self.tracker.lock().await;
        let merged = if keep {
            worktrees
                .integrate(task_id, role)
                .map_err(|e| AgentError::Tracker(format!("{:#}", e)))
        } else {
            Ok(Vec::new())
        };
        if let Err(e) = worktrees.remove(task_id, role) {
            tracing::warn!(task = task_id, role, error = %format!("{:#}", e), "failed to remove role worktree");
        }
        let merged = merged?;
        tracing::debug!(task = task_id, role, keep, files = merged.len(), "role workspace closed");
        Ok(())
    }
}

fn role_key(task_id: &str, role: &str) -> String {
    format!("{}/{}", task_id, role)
}
