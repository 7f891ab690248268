use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subagents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentsConfig {
    /// Maximum nesting depth (0 = subagents may not spawn children).
    #[serde(default = "d_max_depth")]
    pub max_depth: u32,
    /// Default turn budget for a spawned child.
    #[serde(default = "d_child_turns")]
    pub default_max_turns: u32,
    /// Default wait timeout in `waitFor`.
    #[serde(default = "d_wait_ms")]
    pub default_wait_timeout_ms: u64,
}

impl Default for SubagentsConfig {
    fn default() -> Self {
        Self {
            max_depth: d_max_depth(),
            default_max_turns: d_child_turns(),
            default_wait_timeout_ms: d_wait_ms(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_depth() -> u32 {
    1
}
fn d_child_turns() -> u32 {
    15
}
fn d_wait_ms() -> u64 {
    300_000
}
