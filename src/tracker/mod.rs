pub mod git;
pub mod worktree;

pub use git::GitTracker;
pub use worktree::RoleWorktrees;
