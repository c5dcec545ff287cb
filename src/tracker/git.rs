use crate::audit::{ChangeType, ChangedArtifact};
use anyhow::{Context, Result};
use git2::{Delta, DiffOptions, IndexAddOption, Oid, Repository, Signature};
use std::path::Path;

/// Directories never included in snapshots.
const EXCLUDED_DIRS: &[&str] = &[".warden"];

/// Computes changed-artifact sets from working-tree snapshots.
///
/// A snapshot is a commit of the whole working tree that is not attached to
/// any ref: HEAD, branches and the on-disk index are left untouched.
pub struct GitTracker {
    repo: Repository,
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Record the current working tree and return the snapshot commit id.
    pub fn snapshot(&self, label: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        // Role worktrees live under `.warden`; never descend into them.
        let mut skip_excluded = |path: &Path, _spec: &[u8]| -> i32 {
            i32::from(EXCLUDED_DIRS.iter().any(|dir| path.starts_with(dir)))
        };
        index.add_all(
            ["*"].iter(),
            IndexAddOption::DEFAULT,
            Some(&mut skip_excluded as &mut git2::IndexMatchedPath),
        )?;
        index.update_all(["*"].iter(), None)?;
        for dir in EXCLUDED_DIRS {
            index.remove_dir(Path::new(dir), 0)?;
        }

        // Only the tree object is written; the index file on disk is not.
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = Signature::now("warden", "warden@localhost")?;
        let message = format!("[warden] snapshot {}", label);

        let commit_id = match self.head_commit() {
            Some(parent) => self
                .repo
                .commit(None, &sig, &sig, &message, &tree, &[&parent])?,
            None => self.repo.commit(None, &sig, &sig, &message, &tree, &[])?,
        };

        Ok(commit_id.to_string())
    }

    fn head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    /// Changed artifacts between two snapshots, with line counts and added text.
    pub fn changes_between(&self, before: &str, after: &str) -> Result<Vec<ChangedArtifact>> {
        let before_tree = self.repo.find_commit(Oid::from_str(before)?)?.tree()?;
        let after_tree = self.repo.find_commit(Oid::from_str(after)?)?.tree()?;

        let mut opts = DiffOptions::new();
        opts.context_lines(0);
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&before_tree), Some(&after_tree), Some(&mut opts))?;

        let mut artifacts = Vec::new();

        for delta_idx in 0..diff.deltas().len() {
            let Some(delta) = diff.get_delta(delta_idx) else {
                continue;
            };

            let change_type = match delta.status() {
                Delta::Added | Delta::Untracked => ChangeType::Added,
                Delta::Modified | Delta::Typechange => ChangeType::Modified,
                Delta::Deleted => ChangeType::Deleted,
                Delta::Renamed => ChangeType::Renamed,
                _ => continue,
            };

            let file = if change_type == ChangeType::Deleted {
                delta.old_file()
            } else {
                delta.new_file()
            };
            let Some(path) = file.path() else {
                continue;
            };

            let mut artifact =
                ChangedArtifact::new(&path.to_string_lossy().replace('\\', "/"), change_type);

            if let Ok(Some(mut patch)) = git2::Patch::from_diff(&diff, delta_idx) {
                let mut added = Vec::new();
                patch
                    .print(&mut |_delta, _hunk, line| {
                        match line.origin() {
                            '+' => {
                                artifact.lines_added += 1;
                                added.extend_from_slice(line.content());
                            }
                            '-' => artifact.lines_removed += 1,
                            _ => {}
                        }
                        true
                    })
                    .ok();
                artifact.added_text = String::from_utf8_lossy(&added).to_string();
            }

            artifacts.push(artifact);
        }

        Ok(artifacts)
    }

    /// Current HEAD sha, `None` on an unborn branch.
    pub fn head_sha(&self) -> Option<String> {
        self.head_commit().map(|c| c.id().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo() -> (GitTracker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);
        let tracker = GitTracker::new(dir.path()).unwrap();
        (tracker, dir)
    }

    fn commit_file(dir: &Path, name: &str, content: &str, msg: &str) {
        let repo = Repository::open(dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("test", "test@test.com").unwrap();
        if let Ok(head) = repo.head() {
            let parent = head.peel_to_commit().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
                .unwrap();
        } else {
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[])
                .unwrap();
        }
    }

    #[test]
    fn test_snapshot_does_not_move_head() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "readme.txt", "hello", "init");
        let head = tracker.head_sha().unwrap();
        let sha = tracker.snapshot("t-1 cycle 1").unwrap();
        assert_eq!(sha.len(), 40);
        assert_ne!(sha, head);
        assert_eq!(tracker.head_sha().unwrap(), head);
    }

    #[test]
    fn test_snapshot_on_unborn_branch() {
        let (tracker, dir) = setup_repo();
        fs::write(dir.path().join("a.txt"), "x\n").unwrap();
        assert!(tracker.head_sha().is_none());
        let sha = tracker.snapshot("first").unwrap();
        assert_eq!(sha.len(), 40);
        assert!(tracker.head_sha().is_none());
    }

    #[test]
    fn test_added_file_has_lines_and_text() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "existing.txt", "original\n", "init");
        let before = tracker.snapshot("before").unwrap();
        fs::write(dir.path().join("new_file.rs"), "fn main() {}\nfn two() {}\n").unwrap();
        let after = tracker.snapshot("after").unwrap();

        let changes = tracker.changes_between(&before, &after).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "new_file.rs");
        assert_eq!(changes[0].change_type, ChangeType::Added);
        assert_eq!(changes[0].lines_added, 2);
        assert!(changes[0].added_text.contains("fn two()"));
    }

    #[test]
    fn test_modified_and_deleted_files() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "keep.txt", "line one\n", "init");
        commit_file(dir.path(), "gone.txt", "bye\n", "second");
        let before = tracker.snapshot("before").unwrap();

        fs::write(dir.path().join("keep.txt"), "line one\nline two\n").unwrap();
        fs::remove_file(dir.path().join("gone.txt")).unwrap();
        let after = tracker.snapshot("after").unwrap();

        let changes = tracker.changes_between(&before, &after).unwrap();
        let keep = changes.iter().find(|a| a.path == "keep.txt").unwrap();
        assert_eq!(keep.change_type, ChangeType::Modified);
        assert_eq!(keep.lines_added, 1);
        let gone = changes.iter().find(|a| a.path == "gone.txt").unwrap();
        assert_eq!(gone.change_type, ChangeType::Deleted);
        assert_eq!(gone.lines_removed, 1);
    }

    #[test]
    fn test_no_changes_is_empty() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "stable.txt", "unchanged\n", "init");
        let before = tracker.snapshot("before").unwrap();
        let after = tracker.snapshot("after").unwrap();
        assert!(tracker.changes_between(&before, &after).unwrap().is_empty());
    }

    #[test]
    fn test_warden_dir_is_excluded() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "stable.txt", "unchanged\n", "init");
        let before = tracker.snapshot("before").unwrap();
        fs::create_dir_all(dir.path().join(".warden/checkpoints/t-1")).unwrap();
        fs::write(dir.path().join(".warden/checkpoints/t-1/000001.json"), "{}").unwrap();
        let after = tracker.snapshot("after").unwrap();
        assert!(tracker.changes_between(&before, &after).unwrap().is_empty());
    }
}
