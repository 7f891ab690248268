//! Filesystem tools: read, write, edit, list.
//!
//! Relative paths resolve against the session's working directory. Each
//! mutating tool reports the touched path in `details.affectedFiles` so
//! the turn loop can record it on the `tool.result` event.

use std::path::{Path, PathBuf};

use serde_json::Value;

use sb_domain::error::Result;
use sb_domain::tool::ToolResult;

use crate::{Tool, ToolContext};

fn resolve(ctx: &ToolContext, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        Path::new(&ctx.working_directory).join(p)
    }
}

fn affected(path: &Path) -> Value {
    serde_json::json!({ "affectedFiles": [path.display().to_string()] })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ReadFileTool;

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file. Supports optional 1-based line offset and limit."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "offset": {"type": "integer", "description": "1-based first line"},
                "limit": {"type": "integer", "description": "max lines to return"},
            },
            "required": ["path"],
        })
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = resolve(ctx, args.get("path").and_then(Value::as_str).unwrap_or(""));
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };

        let offset = args.get("offset").and_then(Value::as_u64).unwrap_or(1) as usize;
        let limit = args.get("limit").and_then(Value::as_u64).map(|l| l as usize);

        let selected: String = match limit {
            None if offset <= 1 => content,
            _ => {
                let start = offset.saturating_sub(1);
                let lines: Vec<&str> = content.lines().collect();
                let end = limit
                    .map(|l| (start + l).min(lines.len()))
                    .unwrap_or(lines.len());
                if start >= lines.len() {
                    String::new()
                } else {
                    lines[start..end].join("\n")
                }
            }
        };

        Ok(ToolResult::ok(selected).with_details(affected(&path)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WriteFileTool;

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories and \
         overwriting any existing content."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"},
            },
            "required": ["path", "content"],
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = resolve(ctx, args.get("path").and_then(Value::as_str).unwrap_or(""));
        let content = args
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::error(format!(
                    "cannot create {}: {e}",
                    parent.display()
                )));
            }
        }
        if let Err(e) = tokio::fs::write(&path, content).await {
            return Ok(ToolResult::error(format!(
                "cannot write {}: {e}",
                path.display()
            )));
        }

        let mut details = affected(&path);
        details["bytes"] = serde_json::json!(content.len());
        Ok(
            ToolResult::ok(format!("wrote {} bytes to {}", content.len(), path.display()))
                .with_details(details),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// edit_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EditFileTool;

#[async_trait::async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact string in a file. The old string must match \
         exactly once unless replace_all is set."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "old_string": {"type": "string"},
                "new_string": {"type": "string"},
                "replace_all": {"type": "boolean"},
            },
            "required": ["path", "old_string", "new_string"],
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = resolve(ctx, args.get("path").and_then(Value::as_str).unwrap_or(""));
        let old = args
            .get("old_string")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let new = args
            .get("new_string")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let replace_all = args
            .get("replace_all")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if old == new {
            return Ok(ToolResult::error(
                "old_string and new_string are identical",
            ));
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };

        let occurrences = content.matches(old).count();
        if occurrences == 0 {
            return Ok(ToolResult::error("old_string not found in file"));
        }
        if occurrences > 1 && !replace_all {
            return Ok(ToolResult::error(format!(
                "old_string matches {occurrences} times; pass replace_all or \
                 make the match unique"
            )));
        }

        let updated = if replace_all {
            content.replace(old, new)
        } else {
            content.replacen(old, new, 1)
        };
        if let Err(e) = tokio::fs::write(&path, updated).await {
            return Ok(ToolResult::error(format!(
                "cannot write {}: {e}",
                path.display()
            )));
        }

        let replaced = if replace_all { occurrences } else { 1 };
        Ok(
            ToolResult::ok(format!("replaced {replaced} occurrence(s) in {}", path.display()))
                .with_details(affected(&path)),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// list_dir
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ListDirTool;

#[async_trait::async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List directory entries; directories carry a trailing slash."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
            },
            "required": ["path"],
        })
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = resolve(ctx, args.get("path").and_then(Value::as_str).unwrap_or(""));
        let mut read_dir = match tokio::fs::read_dir(&path).await {
            Ok(read_dir) => read_dir,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "cannot list {}: {e}",
                    path.display()
                )))
            }
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();

        Ok(ToolResult::ok(entries.join("\n")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
