//! Token accounting and threshold zones.

use sb_domain::config::ContextConfig;
use sb_domain::message::{ContentBlock, Message};

/// Where the context currently sits relative to the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextZone {
    Green,
    Alert,
    Critical,
}

/// Verdict for admitting another turn.
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnAdmission {
    pub can_proceed: bool,
    pub needs_compaction: bool,
    pub would_exceed_limit: bool,
}

/// Per-session token budget state.
#[derive(Debug, Clone)]
pub struct ContextBudget {
    window_tokens: u64,
    alert_fraction: f64,
    trigger_fraction: f64,
    current_tokens: u64,
}

impl ContextBudget {
    pub fn new(config: &ContextConfig, window_tokens: u64) -> Self {
        let window = if window_tokens == 0 {
            config.default_window_tokens
        } else {
            window_tokens
        };
        Self {
            window_tokens: window,
            alert_fraction: config.alert_fraction,
            trigger_fraction: config.trigger_fraction,
            current_tokens: 0,
        }
    }

    /// Update from a turn's normalized context-window figure.
    pub fn observe(&mut self, context_window_tokens: u64) {
        self.current_tokens = context_window_tokens;
    }

    /// Swap the window when the session switches models.
    pub fn set_window(&mut self, window_tokens: u64) {
        if window_tokens > 0 {
            self.window_tokens = window_tokens;
        }
    }

    pub fn current_tokens(&self) -> u64 {
        self.current_tokens
    }

    pub fn window_tokens(&self) -> u64 {
        self.window_tokens
    }

    pub fn usage_fraction(&self) -> f64 {
        self.current_tokens as f64 / self.window_tokens as f64
    }

    pub fn zone(&self) -> ContextZone {
        let used = self.usage_fraction();
        if used >= self.trigger_fraction {
            ContextZone::Critical
        } else if used >= self.alert_fraction {
            ContextZone::Alert
        } else {
            ContextZone::Green
        }
    }

    /// True once the critical zone is entered.
    pub fn should_compact(&self) -> bool {
        self.zone() == ContextZone::Critical
    }

    pub fn can_accept_turn(&self, estimated_response_tokens: u64) -> TurnAdmission {
        let projected = self.current_tokens + estimated_response_tokens;
        let would_exceed_limit = projected > self.window_tokens;
        let needs_compaction = self.should_compact()
            || projected as f64 >= self.window_tokens as f64 * self.trigger_fraction;
        TurnAdmission {
            can_proceed: !would_exceed_limit,
            needs_compaction,
            would_exceed_limit,
        }
    }
}

/// Rough token estimate for messages with no provider report yet
/// (chars / 4).
pub fn estimate_tokens(messages: &[Message]) -> u64 {
    let chars: usize = messages
        .iter()
        .flat_map(|m| m.content.iter())
        .map(|block| match block {
            ContentBlock::Text { text } => text.len(),
            ContentBlock::Thinking { thinking } => thinking.len(),
            ContentBlock::Image { data, .. } => data.len() / 8,
            ContentBlock::ToolUse { input, .. } => input.to_string().len() + 32,
            ContentBlock::ToolResult { content, .. } => content.len() + 32,
        })
        .sum();
    (chars / 4) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(current: u64) -> ContextBudget {
        let mut b = ContextBudget::new(&ContextConfig::default(), 200_000);
        b.observe(current);
        b
    }

    #[test]
    fn zones_follow_thresholds() {
        // Defaults: alert 0.70, trigger 0.85, window 200k.
        assert_eq!(budget(100_000).zone(), ContextZone::Green);
        assert_eq!(budget(150_000).zone(), ContextZone::Alert);
        assert_eq!(budget(170_000).zone(), ContextZone::Critical);
    }

    #[test]
    fn critical_zone_triggers_compaction() {
        assert!(!budget(100_000).should_compact());
        assert!(budget(170_000).should_compact());
    }

    #[test]
    fn can_accept_turn_projects_response() {
        let verdict = budget(100_000).can_accept_turn(8_000);
        assert!(verdict.can_proceed);
        assert!(!verdict.needs_compaction);
        assert!(!verdict.would_exceed_limit);

        // Close to the ceiling: admitted, but compaction flagged.
        let verdict = budget(160_000).can_accept_turn(20_000);
        assert!(verdict.can_proceed);
        assert!(verdict.needs_compaction);

        // Over the ceiling.
        let verdict = budget(195_000).can_accept_turn(10_000);
        assert!(!verdict.can_proceed);
        assert!(verdict.would_exceed_limit);
    }

    #[test]
    fn zero_window_falls_back_to_config_default() {
        let b = ContextBudget::new(&ContextConfig::default(), 0);
        assert_eq!(b.window_tokens(), 200_000);
    }

    #[test]
    fn estimate_counts_all_block_kinds() {
        let messages = vec![
            Message::user("x".repeat(400)),
            Message::tool_result("c1", "y".repeat(400), false),
        ];
        let estimate = estimate_tokens(&messages);
        assert!(estimate >= 200, "estimate too low: {estimate}");
    }
}
