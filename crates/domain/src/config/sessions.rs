use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Hard cap on inference↔tool loops within one prompt.
    #[serde(default = "d_max_turns")]
    pub max_turns: u32,
    /// Per-session command queue depth.
    #[serde(default = "d_queue_depth")]
    pub queue_depth: usize,
    /// Coalesce streamed text deltas into chunks of at least this many
    /// chars before persisting a `stream.text_delta` event.
    #[serde(default = "d_delta_coalesce")]
    pub delta_coalesce_chars: usize,
    /// How long `waitForAll` lingers on background hooks at session end.
    #[serde(default = "d_hook_drain_ms")]
    pub hook_drain_timeout_ms: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_turns: d_max_turns(),
            queue_depth: d_queue_depth(),
            delta_coalesce_chars: d_delta_coalesce(),
            hook_drain_timeout_ms: d_hook_drain_ms(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_turns() -> u32 {
    25
}
fn d_queue_depth() -> usize {
    32
}
fn d_delta_coalesce() -> usize {
    48
}
fn d_hook_drain_ms() -> u64 {
    5_000
}
