use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worktrees
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreesConfig {
    /// Give each additional session on a busy directory an isolated git
    /// worktree instead of failing the acquisition.
    #[serde(default = "d_true")]
    pub isolate_on_contention: bool,
    /// Directory (relative to the repo root) where isolated worktrees live.
    #[serde(default = "d_worktree_dir")]
    pub worktree_dir: String,
    /// Branch name prefix for isolated worktrees.
    #[serde(default = "d_branch_prefix")]
    pub branch_prefix: String,
}

impl Default for WorktreesConfig {
    fn default() -> Self {
        Self {
            isolate_on_contention: true,
            worktree_dir: d_worktree_dir(),
            branch_prefix: d_branch_prefix(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_worktree_dir() -> String {
    ".switchboard/worktrees".into()
}
fn d_branch_prefix() -> String {
    "switchboard/".into()
}
