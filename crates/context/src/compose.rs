//! System-context composition.
//!
//! Seven ordered parts, each included only when non-empty. For
//! cache-aware providers the first three (core prompt, project rules,
//! workspace memory) form the stable group; the rest are volatile.

use sb_providers::{CacheGroup, SystemPart};

/// Raw inputs gathered by the gateway for one request.
#[derive(Debug, Clone, Default)]
pub struct ContextInputs {
    pub system_prompt: String,
    pub project_rules: String,
    pub workspace_memory: String,
    pub active_rules: String,
    pub skill_context: String,
    pub subagent_results: String,
    pub task_context: String,
}

/// Compose the ordered system parts for a provider request.
pub fn compose_system_parts(inputs: &ContextInputs) -> Vec<SystemPart> {
    let mut parts = Vec::new();

    push(&mut parts, CacheGroup::Stable, inputs.system_prompt.clone());
    push(
        &mut parts,
        CacheGroup::Stable,
        section("# Project Rules", &inputs.project_rules),
    );
    push(
        &mut parts,
        CacheGroup::Stable,
        inputs.workspace_memory.clone(),
    );
    push(
        &mut parts,
        CacheGroup::Volatile,
        section("# Active Rules", &inputs.active_rules),
    );
    push(&mut parts, CacheGroup::Volatile, inputs.skill_context.clone());
    push(
        &mut parts,
        CacheGroup::Volatile,
        inputs.subagent_results.clone(),
    );
    push(
        &mut parts,
        CacheGroup::Volatile,
        wrap_task_context(&inputs.task_context),
    );

    parts
}

fn push(parts: &mut Vec<SystemPart>, group: CacheGroup, text: String) {
    if text.is_empty() {
        return;
    }
    parts.push(SystemPart { text, group });
}

fn section(header: &str, body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!("{header}\n\n{body}")
    }
}

fn wrap_task_context(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!("<task-context>\n{body}\n</task-context>")
    }
}
