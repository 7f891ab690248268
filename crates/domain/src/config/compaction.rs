use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compaction collapses the older portion of a session's history into a
/// summary event pair so the context window stays healthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Allow automatic compaction when the context enters the critical zone.
    #[serde(default = "d_true")]
    pub auto: bool,
    /// Number of recent turns preserved verbatim.
    #[serde(default = "d_keep")]
    pub preserve_recent_turns: usize,
    /// Max tokens requested from the summarizer.
    #[serde(default = "d_summary_tokens")]
    pub max_summary_tokens: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            preserve_recent_turns: d_keep(),
            max_summary_tokens: d_summary_tokens(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_keep() -> usize {
    6
}
fn d_summary_tokens() -> u32 {
    2_000
}
