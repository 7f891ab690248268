use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default per-tool timeout in milliseconds.
    #[serde(default = "d_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Grace period between SIGTERM and SIGKILL for process tools.
    #[serde(default = "d_grace_ms")]
    pub kill_grace_ms: u64,
    /// Output cap per tool result (chars); older output is dropped.
    #[serde(default = "d_max_output")]
    pub max_output_chars: usize,
    /// Tool names denied outright for every session.
    #[serde(default)]
    pub denied_tools: Vec<String>,
    /// Parameter-value patterns that deny a call when matched.
    #[serde(default)]
    pub denied_patterns: Vec<DeniedPattern>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: d_timeout_ms(),
            kill_grace_ms: d_grace_ms(),
            max_output_chars: d_max_output(),
            denied_tools: Vec::new(),
            denied_patterns: Vec::new(),
        }
    }
}

/// Deny a tool call when a named parameter matches a regex
/// (e.g. block `bash` commands matching `rm\s+-rf\s+/`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeniedPattern {
    pub tool: String,
    pub param: String,
    pub pattern: String,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_timeout_ms() -> u64 {
    120_000
}
fn d_grace_ms() -> u64 {
    2_000
}
fn d_max_output() -> usize {
    200_000
}
