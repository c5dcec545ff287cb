use anyhow::{Context, Result};
use git2::{
    ApplyLocation, BranchType, DiffOptions, Oid, Repository, WorktreeAddOptions,
    WorktreePruneOptions,
};
use std::fs;
use std::path::{Path, PathBuf};

use super::GitTracker;

/// One git worktree per specialist role.
///
/// A role's worktree is checked out from a snapshot of the shared tree taken
/// when the role is opened, on a branch `warden/<task>/<role>` that never
/// moves. Changes stay in the worktree until [`RoleWorktrees::integrate`]
/// applies the role's diff to the shared tree.
///
/// # Layout
///
/// - Worktree path: `<root>/<task>/<role>`
/// - Worktree name: `warden-<task>-<role>`
pub struct RoleWorktrees {
    project_dir: PathBuf,
    root: PathBuf,
}

impl RoleWorktrees {
    pub fn new(project_dir: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            root: root.into(),
        }
    }

    pub fn path(&self, task_id: &str, role: &str) -> PathBuf {
        self.root.join(slug(task_id)).join(slug(role))
    }

    fn worktree_name(task_id: &str, role: &str) -> String {
        format!("warden-{}-{}", slug(task_id), slug(role))
    }

    fn branch_name(task_id: &str, role: &str) -> String {
        format!("warden/{}/{}", slug(task_id), slug(role))
    }

    fn is_valid(path: &Path) -> bool {
        path.join(".git").exists() && Repository::open(path).is_ok()
    }

    /// Create the role's worktree from the current shared tree, or reuse the
    /// one left by an earlier run of the same role.
    pub fn prepare(&self, shared: &GitTracker, task_id: &str, role: &str) -> Result<PathBuf> {
        let path = self.path(task_id, role);
        if Self::is_valid(&path) {
            tracing::debug!(task = task_id, role, path = %path.display(), "reusing role worktree");
            return Ok(path);
        }

        let repo = Repository::open(&self.project_dir).context("Failed to open git repository")?;
        let name = Self::worktree_name(task_id, role);
        if let Ok(stale) = repo.find_worktree(&name) {
            let mut opts = WorktreePruneOptions::new();
            opts.valid(true).locked(true).working_tree(true);
            stale
                .prune(Some(&mut opts))
                .with_context(|| format!("Failed to prune stale worktree {}", name))?;
        }
        if path.exists() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to clear {}", path.display()))?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let base = shared.snapshot(&format!("{}/{} base", task_id, role))?;
        let commit = repo.find_commit(Oid::from_str(&base)?)?;
        let branch = repo
            .branch(&Self::branch_name(task_id, role), &commit, true)
            .context("Failed to create role branch")?;
        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(branch.get()));
        repo.worktree(&name, &path, Some(&opts))
            .with_context(|| format!("Failed to create worktree at {}", path.display()))?;

        tracing::info!(task = task_id, role, path = %path.display(), base = %base, "role worktree created");
        Ok(path)
    }

    /// Apply everything the role changed since its base to the shared working
    /// tree. Returns the paths touched; nothing happens when the worktree is
    /// gone.
    pub fn integrate(&self, task_id: &str, role: &str) -> Result<Vec<String>> {
        let path = self.path(task_id, role);
        if !Self::is_valid(&path) {
            return Ok(Vec::new());
        }

        let role_tree = GitTracker::new(&path)?;
        let base = role_tree
            .head_sha()
            .context("Role worktree has no base commit")?;
        let after = role_tree.snapshot(&format!("{}/{} final", task_id, role))?;

        let repo = Repository::open(&self.project_dir).context("Failed to open git repository")?;
        let base_tree = repo.find_commit(Oid::from_str(&base)?)?.tree()?;
        let after_tree = repo.find_commit(Oid::from_str(&after)?)?.tree()?;
        let mut opts = DiffOptions::new();
        opts.show_binary(true);
        let diff = repo.diff_tree_to_tree(Some(&base_tree), Some(&after_tree), Some(&mut opts))?;

        let paths: Vec<String> = diff
            .deltas()
            .filter_map(|d| d.new_file().path().or_else(|| d.old_file().path()))
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .collect();
        if paths.is_empty() {
            return Ok(paths);
        }

        repo.apply(&diff, ApplyLocation::WorkDir, None)
            .with_context(|| format!("Changes of role '{}' do not apply to the shared tree", role))?;
        tracing::info!(task = task_id, role, files = paths.len(), "role changes merged");
        Ok(paths)
    }

    /// Delete the role's worktree and branch. Missing pieces are ignored.
    pub fn remove(&self, task_id: &str, role: &str) -> Result<()> {
        let repo = Repository::open(&self.project_dir).context("Failed to open git repository")?;
        let name = Self::worktree_name(task_id, role);
        if let Ok(worktree) = repo.find_worktree(&name) {
            let mut opts = WorktreePruneOptions::new();
            opts.valid(true).locked(true).working_tree(true);
            worktree
                .prune(Some(&mut opts))
                .with_context(|| format!("Failed to prune worktree {}", name))?;
        }

        let path = self.path(task_id, role);
        if path.exists() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }

        if let Ok(mut branch) = repo.find_branch(&Self::branch_name(task_id, role), BranchType::Local) {
            branch.delete().context("Failed to delete role branch")?;
        }
        Ok(())
    }
}

/// Task ids and role names restricted to characters valid in branch and
/// directory names.
fn slug(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}
