//! Tool registry and the per-session denial layer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use sb_domain::config::ToolsConfig;
use sb_domain::tool::ToolDefinition;

use crate::{definition_of, Tool};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Denial policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CompiledPattern {
    tool: String,
    param: String,
    regex: regex::Regex,
    source: String,
}

/// Filters tool calls by exact name or parameter-value pattern.
/// Denied calls produce a synthetic error result and never execute.
#[derive(Default)]
pub struct DenialPolicy {
    denied_tools: HashSet<String>,
    patterns: Vec<CompiledPattern>,
}

impl DenialPolicy {
    pub fn from_config(config: &ToolsConfig) -> Self {
        let mut policy = Self {
            denied_tools: config.denied_tools.iter().cloned().collect(),
            patterns: Vec::new(),
        };
        for pattern in &config.denied_patterns {
            match regex::Regex::new(&pattern.pattern) {
                Ok(regex) => policy.patterns.push(CompiledPattern {
                    tool: pattern.tool.clone(),
                    param: pattern.param.clone(),
                    regex,
                    source: pattern.pattern.clone(),
                }),
                Err(e) => {
                    // Config validation flags this at startup; a bad
                    // pattern at runtime is skipped, not silently allowed.
                    tracing::error!(
                        pattern = %pattern.pattern,
                        error = %e,
                        "invalid denial pattern ignored"
                    );
                }
            }
        }
        policy
    }

    /// Extend with per-session denials on top of the global config.
    pub fn deny_tools(&mut self, names: &[String]) {
        self.denied_tools.extend(names.iter().cloned());
    }

    /// Returns the denial reason if the call must not run.
    pub fn check(&self, tool_name: &str, args: &Value) -> Option<String> {
        if self.denied_tools.contains(tool_name) {
            return Some(format!("tool '{tool_name}' is denied by policy"));
        }
        for pattern in &self.patterns {
            if pattern.tool != tool_name {
                continue;
            }
            let Some(value) = args.get(&pattern.param).and_then(Value::as_str) else {
                continue;
            };
            if pattern.regex.is_match(value) {
                return Some(format!(
                    "call to '{tool_name}' denied: parameter '{}' matches blocked pattern '{}'",
                    pattern.param, pattern.source
                ));
            }
        }
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_owned();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Definitions for the provider request, in registration order,
    /// minus denied names.
    pub fn definitions(&self, policy: &DenialPolicy) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter(|name| policy.check(name, &Value::Null).is_none())
            .filter_map(|name| self.tools.get(name))
            .map(|tool| definition_of(tool.as_ref()))
            .collect()
    }
}
