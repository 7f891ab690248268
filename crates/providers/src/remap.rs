//! Tool-call id remapping for mid-session provider switches.
//!
//! A session that moved from a `toolu_…` provider to a `call_…` provider
//! still carries the original ids in its event log. At request time the
//! adapter builds a deterministic remap for every id that doesn't match
//! its format, applies it to the outgoing messages, and reverses it on
//! incoming tool-call events so event-log ids stay stable.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use sb_domain::message::{ContentBlock, Message};

use crate::traits::ToolIdFormat;

/// A per-request bidirectional id mapping.
#[derive(Debug, Default, Clone)]
pub struct IdRemap {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl IdRemap {
    /// Build the remap for every tool-use / tool-result id in `messages`
    /// that doesn't match `target`.
    pub fn build(messages: &[Message], target: ToolIdFormat) -> Self {
        let mut remap = Self::default();
        for message in messages {
            for block in &message.content {
                let id = match block {
                    ContentBlock::ToolUse { id, .. } => id,
                    ContentBlock::ToolResult { tool_use_id, .. } => tool_use_id,
                    _ => continue,
                };
                if !target.matches(id) && !remap.forward.contains_key(id) {
                    let mapped = deterministic_id(id, target);
                    remap.reverse.insert(mapped.clone(), id.clone());
                    remap.forward.insert(id.clone(), mapped);
                }
            }
        }
        remap
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Outbound: original id → target-format id.
    pub fn apply(&self, id: &str) -> String {
        self.forward.get(id).cloned().unwrap_or_else(|| id.to_owned())
    }

    /// Inbound: target-format id → original id.
    pub fn reverse(&self, id: &str) -> String {
        self.reverse.get(id).cloned().unwrap_or_else(|| id.to_owned())
    }

    /// Rewrite all tool ids in a message list for the outbound request.
    pub fn apply_to_messages(&self, messages: &mut [Message]) {
        if self.is_empty() {
            return;
        }
        for message in messages {
            for block in &mut message.content {
                match block {
                    ContentBlock::ToolUse { id, .. } => {
                        *id = self.apply(id);
                    }
                    ContentBlock::ToolResult { tool_use_id, .. } => {
                        *tool_use_id = self.apply(tool_use_id);
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Derive a stable target-format id from the original.
///
/// Hash-based so the same original id always maps to the same target id
/// within and across requests.
fn deterministic_id(original: &str, target: ToolIdFormat) -> String {
    let mut hasher = DefaultHasher::new();
    original.hash(&mut hasher);
    let digest = hasher.finish();
    format!("{}{digest:016x}", target.prefix())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant_with_tool(id: &str) -> Message {
        Message {
            role: sb_domain::message::Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: id.into(),
                name: "bash".into(),
                input: serde_json::json!({}),
            }],
        }
    }

    #[test]
    fn matching_ids_pass_through() {
        let messages = vec![assistant_with_tool("call_abc")];
        let remap = IdRemap::build(&messages, ToolIdFormat::OpenAi);
        assert!(remap.is_empty());
        assert_eq!(remap.apply("call_abc"), "call_abc");
    }

    #[test]
    fn foreign_ids_are_remapped_deterministically() {
        let messages = vec![assistant_with_tool("toolu_01XYZ")];
        let a = IdRemap::build(&messages, ToolIdFormat::OpenAi);
        let b = IdRemap::build(&messages, ToolIdFormat::OpenAi);
        let mapped = a.apply("toolu_01XYZ");
        assert!(mapped.starts_with("call_"));
        assert_eq!(mapped, b.apply("toolu_01XYZ"));
    }

    #[test]
    fn roundtrip_law() {
        // P7: for any id x remapped to y on outbound, incoming references
        // to y rewrite back to x.
        let messages = vec![
            assistant_with_tool("toolu_first"),
            Message::tool_result("toolu_first", "ok", false),
            assistant_with_tool("toolu_second"),
        ];
        let remap = IdRemap::build(&messages, ToolIdFormat::OpenAi);
        for original in ["toolu_first", "toolu_second"] {
            let outbound = remap.apply(original);
            assert_ne!(outbound, original);
            assert_eq!(remap.reverse(&outbound), original);
        }
    }

    #[test]
    fn apply_to_messages_rewrites_both_block_kinds() {
        let mut messages = vec![
            assistant_with_tool("toolu_x"),
            Message::tool_result("toolu_x", "output", false),
        ];
        let remap = IdRemap::build(&messages, ToolIdFormat::OpenAi);
        remap.apply_to_messages(&mut messages);

        let ContentBlock::ToolUse { id, .. } = &messages[0].content[0] else {
            panic!("expected tool_use");
        };
        let ContentBlock::ToolResult { tool_use_id, .. } = &messages[1].content[0] else {
            panic!("expected tool_result");
        };
        assert_eq!(id, tool_use_id);
        assert!(id.starts_with("call_"));
    }

    #[test]
    fn gemini_accepts_everything() {
        let messages = vec![assistant_with_tool("toolu_01XYZ")];
        let remap = IdRemap::build(&messages, ToolIdFormat::Gemini);
        assert!(remap.is_empty());
    }
}
