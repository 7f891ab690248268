use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thresholds for context-window usage, as fractions of the model's
/// context window. Below `alert_fraction` is the green zone; between
/// alert and trigger is the alert zone; at or above `trigger_fraction`
/// compaction is due.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "d_alert")]
    pub alert_fraction: f64,
    #[serde(default = "d_trigger")]
    pub trigger_fraction: f64,
    /// Fallback context window when the provider doesn't report one.
    #[serde(default = "d_window")]
    pub default_window_tokens: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            alert_fraction: d_alert(),
            trigger_fraction: d_trigger(),
            default_window_tokens: d_window(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_alert() -> f64 {
    0.70
}
fn d_trigger() -> f64 {
    0.85
}
fn d_window() -> u64 {
    200_000
}
