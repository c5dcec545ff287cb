//! Append-only checkpoint store.
//!
//! Checkpoints are keyed by namespace (task id, optional role) and numbered
//! monotonically. Files are never overwritten: each save writes a hidden temp
//! file, syncs it, and hard-links it to `NNNNNN.json`, which fails if that
//! number exists. The highest readable number is authoritative; an unreadable
//! tail is skipped with a warning.
//!
//! ```text
//! .warden/checkpoints/
//! └── <task>/
//!     ├── 000001.json
//!     ├── 000002.json
//!     └── roles/
//!         └── <role>/
//!             └── 000001.json
//! .warden/archive/
//! └── <task>[-<timestamp>]/   # moved here when the task reaches a terminal state
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::audit::{ChangeType, ChangedArtifact};
use crate::errors::CheckpointError;
use crate::task::{BlockReason, TaskStatus};
use crate::verify::{VerdictKind, VerdictSummary};

/// Default number of cycle summaries kept inline in each checkpoint.
pub const DEFAULT_RECENT_WINDOW: usize = 5;

/// A checkpoint namespace: a task, or one role within a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub task_id: String,
    pub role: Option<String>,
}

impl Namespace {
    pub fn task(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            role: None,
        }
    }

    pub fn role(task_id: &str, role: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            role: Some(role.to_string()),
        }
    }

    fn validate(&self) -> Result<(), CheckpointError> {
        validate_key(&self.task_id)?;
        if let Some(ref role) = self.role {
            validate_key(role)?;
        }
        Ok(())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Some(ref role) => write!(f, "{}/{}", self.task_id, role),
            None => write!(f, "{}", self.task_id),
        }
    }
}

fn validate_key(key: &str) -> Result<(), CheckpointError> {
    let bad = key.is_empty()
        || key == "."
        || key == ".."
        || key == "roles"
        || key.contains(['/', '\\', '\0']);
    if bad {
        return Err(CheckpointError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// What the cycle that produced a checkpoint did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPhase {
    /// The agent ran and its changes were verified.
    Verified,
    /// The agent ran but produced no changes (first empty cycle still verifies).
    NoChanges,
    /// The agent invocation failed (crash, timeout); retried within budget.
    AgentError,
    /// Second consecutive empty cycle.
    Stagnation,
    /// Budget ran out without a PASS.
    BudgetExhausted,
    /// Task-level result of a multi-agent run.
    Synthesis,
}

impl fmt::Display for CheckpointPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Verified => "verified",
            Self::NoChanges => "no_changes",
            Self::AgentError => "agent_error",
            Self::Stagnation => "stagnation",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Synthesis => "synthesis",
        };
        write!(f, "{}", s)
    }
}

/// Resource counters. Cumulative within a namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub agent_invocations: u32,
    pub verification_runs: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub elapsed_ms: u64,
}

impl ResourceUsage {
    pub fn add(&mut self, other: &ResourceUsage) {
        self.agent_invocations += other.agent_invocations;
        self.verification_runs += other.verification_runs;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_usd += other.cost_usd;
        self.elapsed_ms += other.elapsed_ms;
    }
}

/// A changed artifact as carried across restarts, added text included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub path: String,
    pub change_type: ChangeType,
    pub lines_added: usize,
    pub lines_removed: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub added_text: String,
}

impl From<&ChangedArtifact> for ArtifactRecord {
    fn from(a: &ChangedArtifact) -> Self {
        Self {
            path: a.path.clone(),
            change_type: a.change_type,
            lines_added: a.lines_added,
            lines_removed: a.lines_removed,
            added_text: a.added_text.clone(),
        }
    }
}

impl From<&ArtifactRecord> for ChangedArtifact {
    fn from(r: &ArtifactRecord) -> Self {
        ChangedArtifact {
            path: r.path.clone(),
            change_type: r.change_type,
            lines_added: r.lines_added,
            lines_removed: r.lines_removed,
            added_text: r.added_text.clone(),
        }
    }
}

/// One line of the trailing cycle window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub iteration: u32,
    pub phase: CheckpointPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<VerdictKind>,
    pub files_changed: usize,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Assigned by the store on save.
    pub number: u64,
    pub iteration: u32,
    pub phase: CheckpointPhase,
    pub status: TaskStatus,
    /// Last agent output, shortened.
    pub summary: String,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub usage: ResourceUsage,
    /// Consecutive cycles without changes.
    #[serde(default)]
    pub stagnant_cycles: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verdict: Option<VerdictSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<BlockReason>,
    /// Latest version of every artifact changed so far in this namespace.
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
    /// Context owed to the next cycle: failure feedback, or the error of an
    /// invocation that did not finish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_feedback: Option<String>,
    #[serde(default)]
    pub recent: Vec<CycleSummary>,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(ns: &Namespace, iteration: u32, phase: CheckpointPhase, status: TaskStatus) -> Self {
        Self {
            task_id: ns.task_id.clone(),
            role: ns.role.clone(),
            number: 0,
            iteration,
            phase,
            status,
            summary: String::new(),
            next_steps: Vec::new(),
            usage: ResourceUsage::default(),
            stagnant_cycles: 0,
            last_verdict: None,
            block_reason: None,
            artifacts: Vec::new(),
            pending_feedback: None,
            recent: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        Namespace {
            task_id: self.task_id.clone(),
            role: self.role.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append to the trailing window, keeping at most `window` entries.
    pub fn push_recent(&mut self, entry: CycleSummary, window: usize) {
        self.recent.push(entry);
        if self.recent.len() > window {
            let excess = self.recent.len() - window;
            self.recent.drain(..excess);
        }
    }

    pub fn changed_artifacts(&self) -> Vec<ChangedArtifact> {
        self.artifacts.iter().map(ChangedArtifact::from).collect()
    }
}

/// Partial update applied on top of the latest checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CheckpointPatch {
    pub phase: Option<CheckpointPhase>,
    pub status: Option<TaskStatus>,
    pub summary: Option<String>,
    pub next_steps: Option<Vec<String>>,
    pub block_reason: Option<BlockReason>,
    pub usage_delta: Option<ResourceUsage>,
}

/// Exclusive writer registration for a namespace. Released on drop.
#[derive(Debug)]
pub struct NamespaceLease {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl NamespaceLease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for NamespaceLease {
    fn drop(&mut self) {
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&self.key);
    }
}

/// Durable checkpoint storage.
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint as the next number in its namespace. Returns it with
    /// `number` and `timestamp` filled in.
    fn save(&self, checkpoint: Checkpoint) -> Result<Checkpoint, CheckpointError>;

    /// Highest-numbered checkpoint, if any.
    fn latest(&self, ns: &Namespace) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Apply `patch` to the latest checkpoint and save the result as a new one.
    fn update(&self, ns: &Namespace, patch: CheckpointPatch)
    -> Result<Checkpoint, CheckpointError>;

    /// All checkpoints of a namespace, oldest first.
    fn history(&self, ns: &Namespace) -> Result<Vec<Checkpoint>, CheckpointError>;

    /// Move a task's checkpoints (all roles) to the archive. `None` if there was nothing to move.
    fn archive(&self, task_id: &str) -> Result<Option<PathBuf>, CheckpointError>;

    /// Register as the single writer of `ns`.
    fn acquire(&self, ns: &Namespace) -> Result<NamespaceLease, CheckpointError>;
}

/// Filesystem-backed store.
pub struct FsCheckpointStore {
    root: PathBuf,
    archive_root: PathBuf,
    leases: Arc<Mutex<HashSet<String>>>,
}

impl FsCheckpointStore {
    pub fn new(root: impl Into<PathBuf>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            archive_root: archive_root.into(),
            leases: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id)
    }

    fn ns_dir(&self, ns: &Namespace) -> PathBuf {
        let dir = self.task_dir(&ns.task_id);
        match ns.role {
            Some(ref role) => dir.join("roles").join(role),
            None => dir,
        }
    }

    /// Checkpoint numbers present in a namespace directory, ascending.
    fn numbers(&self, ns: &Namespace) -> Result<Vec<u64>, CheckpointError> {
        list_numbers(&self.ns_dir(ns))
    }

    fn read_checkpoint(path: &Path) -> Result<Checkpoint, CheckpointError> {
        let content = fs::read_to_string(path).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write `checkpoint` at its own number. Fails if that number exists.
    ///
    /// The content is complete and synced before the numbered name appears,
    /// so a crash never leaves a truncated `NNNNNN.json`.
    fn write_numbered(&self, checkpoint: &Checkpoint) -> Result<PathBuf, CheckpointError> {
        let ns = checkpoint.namespace();
        let dir = self.ns_dir(&ns);
        fs::create_dir_all(&dir).map_err(|source| CheckpointError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(format!("{:06}.json", checkpoint.number));
        let json = serde_json::to_string_pretty(checkpoint).map_err(CheckpointError::Serialize)?;

        let tmp = dir.join(format!(
            ".{:06}.{}.tmp",
            checkpoint.number,
            uuid::Uuid::new_v4().simple()
        ));
        let written = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .and_then(|mut file| {
                file.write_all(json.as_bytes())?;
                file.sync_all()
            });
        if let Err(source) = written {
            fs::remove_file(&tmp).ok();
            return Err(CheckpointError::Io { path: tmp, source });
        }

        let linked = fs::hard_link(&tmp, &path);
        fs::remove_file(&tmp).ok();
        match linked {
            Ok(()) => Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(CheckpointError::AlreadyExists {
                    namespace: ns.to_string(),
                    number: checkpoint.number,
                })
            }
            Err(source) => Err(CheckpointError::Io { path, source }),
        }
    }

    /// Read a checkpoint, mapping a corrupt file to `None` with a warning.
    fn read_readable(ns: &Namespace, path: &Path) -> Result<Option<Checkpoint>, CheckpointError> {
        match Self::read_checkpoint(path) {
            Ok(cp) => Ok(Some(cp)),
            Err(e @ CheckpointError::Corrupt { .. }) => {
                tracing::warn!(namespace = %ns, error = %e, "skipping unreadable checkpoint");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Role namespaces recorded for a task.
    pub fn roles(&self, task_id: &str) -> Result<Vec<String>, CheckpointError> {
        let dir = self.task_dir(task_id).join("roles");
        list_dirs(&dir)
    }

    /// Task ids with live (non-archived) checkpoints.
    pub fn active_tasks(&self) -> Result<Vec<String>, CheckpointError> {
        list_dirs(&self.root)
    }

    /// Archived task directories, newest name last.
    pub fn archived(&self) -> Result<Vec<String>, CheckpointError> {
        list_dirs(&self.archive_root)
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn save(&self, mut checkpoint: Checkpoint) -> Result<Checkpoint, CheckpointError> {
        let ns = checkpoint.namespace();
        ns.validate()?;
        let next = self.numbers(&ns)?.last().copied().unwrap_or(0) + 1;
        checkpoint.number = next;
        checkpoint.timestamp = Utc::now();
        let path = self.write_numbered(&checkpoint)?;
        tracing::debug!(namespace = %ns, number = next, path = %path.display(), "checkpoint saved");
        Ok(checkpoint)
    }

    fn latest(&self, ns: &Namespace) -> Result<Option<Checkpoint>, CheckpointError> {
        ns.validate()?;
        let dir = self.ns_dir(ns);
        let numbers = self.numbers(ns)?;
        for number in numbers.iter().rev() {
            if let Some(cp) = Self::read_readable(ns, &dir.join(format!("{:06}.json", number)))? {
                return Ok(Some(cp));
            }
        }
        match numbers.last() {
            // Nothing readable at all is an error, not a fresh start.
            Some(number) => Self::read_checkpoint(&dir.join(format!("{:06}.json", number))).map(Some),
            None => Ok(None),
        }
    }

    fn update(
        &self,
        ns: &Namespace,
        patch: CheckpointPatch,
    ) -> Result<Checkpoint, CheckpointError> {
        let mut checkpoint = self
            .latest(ns)?
            .ok_or_else(|| CheckpointError::NotFound(ns.to_string()))?;

        if let Some(phase) = patch.phase {
            checkpoint.phase = phase;
        }
        if let Some(status) = patch.status {
            checkpoint.status = status;
        }
        if let Some(summary) = patch.summary {
            checkpoint.summary = summary;
        }
        if let Some(steps) = patch.next_steps {
            checkpoint.next_steps = steps;
        }
        if let Some(reason) = patch.block_reason {
            checkpoint.block_reason = Some(reason);
        }
        if let Some(delta) = patch.usage_delta {
            checkpoint.usage.add(&delta);
        }

        self.save(checkpoint)
    }

    fn history(&self, ns: &Namespace) -> Result<Vec<Checkpoint>, CheckpointError> {
        ns.validate()?;
        let dir = self.ns_dir(ns);
        let mut history = Vec::new();
        for n in self.numbers(ns)? {
            if let Some(cp) = Self::read_readable(ns, &dir.join(format!("{:06}.json", n)))? {
                history.push(cp);
            }
        }
        Ok(history)
    }

    fn archive(&self, task_id: &str) -> Result<Option<PathBuf>, CheckpointError> {
        validate_key(task_id)?;
        let src = self.task_dir(task_id);
        if !src.exists() {
            return Ok(None);
        }

        fs::create_dir_all(&self.archive_root).map_err(|source| CheckpointError::Io {
            path: self.archive_root.clone(),
            source,
        })?;

        let mut dest = self.archive_root.join(task_id);
        if dest.exists() {
            let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
            dest = self.archive_root.join(format!("{}-{}", task_id, stamp));
        }

        fs::rename(&src, &dest).map_err(|source| CheckpointError::Io {
            path: src.clone(),
            source,
        })?;
        tracing::info!(task = task_id, archive = %dest.display(), "checkpoints archived");
        Ok(Some(dest))
    }

    fn acquire(&self, ns: &Namespace) -> Result<NamespaceLease, CheckpointError> {
        ns.validate()?;
        let key = ns.to_string();
        let mut held = match self.leases.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !held.insert(key.clone()) {
            return Err(CheckpointError::NamespaceBusy(key));
        }
        Ok(NamespaceLease {
            key,
            held: Arc::clone(&self.leases),
        })
    }
}

fn list_numbers(dir: &Path) -> Result<Vec<u64>, CheckpointError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(CheckpointError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut numbers: Vec<u64> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map(|e| e == "json").unwrap_or(false))
        .filter_map(|p| p.file_stem()?.to_str()?.parse::<u64>().ok())
        .collect();
    numbers.sort_unstable();
    Ok(numbers)
}

fn list_dirs(dir: &Path) -> Result<Vec<String>, CheckpointError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(CheckpointError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn setup_store() -> (FsCheckpointStore, TempDir) {
        let dir = tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path().join("checkpoints"), dir.path().join("archive"));
        (store, dir)
    }

    fn cycle(ns: &Namespace, iteration: u32) -> Checkpoint {
        Checkpoint::new(ns, iteration, CheckpointPhase::Verified, TaskStatus::InProgress)
    }

    #[test]
    fn test_save_assigns_increasing_numbers() {
        let (store, _dir) = setup_store();
        let ns = Namespace::task("t-1");
        let a = store.save(cycle(&ns, 1)).unwrap();
        let b = store.save(cycle(&ns, 2)).unwrap();
        assert_eq!(a.number, 1);
        assert_eq!(b.number, 2);
        assert!(store.root().join("t-1/000002.json").exists());
    }

    #[test]
    fn test_latest_is_highest_number() {
        let (store, _dir) = setup_store();
        let ns = Namespace::task("t-1");
        assert!(store.latest(&ns).unwrap().is_none());
        for i in 1..=3 {
            store.save(cycle(&ns, i)).unwrap();
        }
        let latest = store.latest(&ns).unwrap().unwrap();
        assert_eq!(latest.number, 3);
        assert_eq!(latest.iteration, 3);
    }

    #[test]
    fn test_existing_number_is_never_overwritten() {
        let (store, _dir) = setup_store();
        let ns = Namespace::task("t-1");
        let saved = store.save(cycle(&ns, 1)).unwrap();

        let mut dup = cycle(&ns, 99);
        dup.number = saved.number;
        let err = store.write_numbered(&dup).unwrap_err();
        assert!(matches!(err, CheckpointError::AlreadyExists { number: 1, .. }));
        assert_eq!(store.latest(&ns).unwrap().unwrap().iteration, 1);
    }

    #[test]
    fn test_role_namespaces_are_disjoint() {
        let (store, _dir) = setup_store();
        let task = Namespace::task("t-2");
        let fixer = Namespace::role("t-2", "fixer");
        let writer = Namespace::role("t-2", "test-writer");

        store.save(cycle(&fixer, 1)).unwrap();
        store.save(cycle(&fixer, 2)).unwrap();
        store.save(cycle(&writer, 1)).unwrap();

        assert!(store.latest(&task).unwrap().is_none());
        assert_eq!(store.history(&fixer).unwrap().len(), 2);
        assert_eq!(store.history(&writer).unwrap().len(), 1);
        assert_eq!(store.roles("t-2").unwrap(), vec!["fixer", "test-writer"]);
    }

    #[test]
    fn test_update_appends_patched_copy() {
        let (store, _dir) = setup_store();
        let ns = Namespace::task("t-3");
        let mut first = cycle(&ns, 1);
        first.usage.cost_usd = 0.5;
        store.save(first).unwrap();

        let updated = store
            .update(
                &ns,
                CheckpointPatch {
                    status: Some(TaskStatus::Completed),
                    usage_delta: Some(ResourceUsage {
                        cost_usd: 0.25,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.number, 2);
        assert_eq!(updated.status, TaskStatus::Completed);
        assert!((updated.usage.cost_usd - 0.75).abs() < f64::EPSILON);
        assert_eq!(store.history(&ns).unwrap()[0].status, TaskStatus::InProgress);
    }

    #[test]
    fn test_update_without_checkpoint_is_not_found() {
        let (store, _dir) = setup_store();
        let err = store
            .update(&Namespace::task("missing"), CheckpointPatch::default())
            .unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[test]
    fn test_archive_moves_history() {
        let (store, dir) = setup_store();
        let ns = Namespace::task("t-4");
        store.save(cycle(&ns, 1)).unwrap();
        store.save(cycle(&Namespace::role("t-4", "fixer"), 1)).unwrap();

        let dest = store.archive("t-4").unwrap().unwrap();
        assert_eq!(dest, dir.path().join("archive/t-4"));
        assert!(dest.join("000001.json").exists());
        assert!(dest.join("roles/fixer/000001.json").exists());
        assert!(store.latest(&ns).unwrap().is_none());

        // A second archive of the same id gets a timestamped directory.
        store.save(cycle(&ns, 1)).unwrap();
        let second = store.archive("t-4").unwrap().unwrap();
        assert_ne!(second, dest);
        assert_eq!(store.archived().unwrap().len(), 2);
        assert!(store.archive("t-4").unwrap().is_none());
    }

    #[test]
    fn test_single_writer_lease() {
        let (store, _dir) = setup_store();
        let ns = Namespace::role("t-5", "fixer");
        let lease = store.acquire(&ns).unwrap();
        assert_eq!(lease.key(), "t-5/fixer");
        assert!(matches!(
            store.acquire(&ns),
            Err(CheckpointError::NamespaceBusy(_))
        ));
        // A different namespace is independent.
        let _other = store.acquire(&Namespace::task("t-5")).unwrap();
        drop(lease);
        assert!(store.acquire(&ns).is_ok());
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let (store, _dir) = setup_store();
        for bad in ["", "..", "a/b", "roles"] {
            let err = store.save(cycle(&Namespace::task(bad), 1)).unwrap_err();
            assert!(matches!(err, CheckpointError::InvalidKey(_)), "{bad:?}");
        }
    }

    #[test]
    fn test_recent_window_is_bounded() {
        let ns = Namespace::task("t");
        let mut cp = cycle(&ns, 1);
        for i in 1..=8 {
            cp.push_recent(
                CycleSummary {
                    iteration: i,
                    phase: CheckpointPhase::Verified,
                    verdict: None,
                    files_changed: 1,
                    note: String::new(),
                },
                DEFAULT_RECENT_WINDOW,
            );
        }
        assert_eq!(cp.recent.len(), DEFAULT_RECENT_WINDOW);
        assert_eq!(cp.recent[0].iteration, 4);
    }

    #[test]
    fn test_only_corrupt_checkpoint_reported() {
        let (store, _dir) = setup_store();
        let ns = Namespace::task("t-6");
        fs::create_dir_all(store.root().join("t-6")).unwrap();
        fs::write(store.root().join("t-6/000001.json"), "{ not json").unwrap();
        assert!(matches!(
            store.latest(&ns),
            Err(CheckpointError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_truncated_tail_falls_back_to_previous() {
        let (store, _dir) = setup_store();
        let ns = Namespace::task("t-7");
        store.save(cycle(&ns, 1)).unwrap();
        store.save(cycle(&ns, 2)).unwrap();
        // Left behind by a crash halfway through a write.
        fs::write(store.root().join("t-7/000003.json"), "{\"task_id\": \"t-7\", \"num").unwrap();

        let latest = store.latest(&ns).unwrap().unwrap();
        assert_eq!(latest.number, 2);
        assert_eq!(store.history(&ns).unwrap().len(), 2);

        // The damaged number is never reused.
        let next = store.save(cycle(&ns, 3)).unwrap();
        assert_eq!(next.number, 4);
        assert_eq!(store.latest(&ns).unwrap().unwrap().iteration, 3);
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let (store, _dir) = setup_store();
        let ns = Namespace::task("t-8");
        let saved = store.save(cycle(&ns, 1)).unwrap();
        let mut dup = cycle(&ns, 1);
        dup.number = saved.number;
        assert!(store.write_numbered(&dup).is_err());

        let names: Vec<String> = fs::read_dir(store.root().join("t-8"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["000001.json"]);
    }

    #[test]
    fn test_artifacts_keep_added_text() {
        let (store, _dir) = setup_store();
        let ns = Namespace::task("t-9");
        let artifact = ChangedArtifact::new("src/a.rs", ChangeType::Modified).with_added("fn a() {}\n");
        let mut cp = cycle(&ns, 1);
        cp.artifacts = vec![ArtifactRecord::from(&artifact)];
        cp.pending_feedback = Some("Failed check: tests".into());
        store.save(cp).unwrap();

        let latest = store.latest(&ns).unwrap().unwrap();
        assert_eq!(latest.changed_artifacts(), vec![artifact]);
        assert_eq!(latest.pending_feedback.as_deref(), Some("Failed check: tests"));
    }
}
