//! `filesystem.*` and `file.read` — client-facing filesystem access.

use serde_json::Value;

use crate::rpc::{opt_u64_param, str_param, MethodRegistry, RequestContext, RpcError};

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "filesystem.listDir",
        &["path"],
        |_ctx: RequestContext, params: Value| async move {
            let path = str_param(&params, "path")?;
            let mut read_dir = tokio::fs::read_dir(&path)
                .await
                .map_err(|e| RpcError::not_found(format!("cannot list {path}: {e}")))?;
            let mut entries = Vec::new();
            while let Ok(Some(entry)) = read_dir.next_entry().await {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|t| t.is_dir())
                    .unwrap_or(false);
                entries.push(serde_json::json!({"name": name, "isDirectory": is_dir}));
            }
            entries.sort_by(|a, b| {
                a["name"]
                    .as_str()
                    .unwrap_or_default()
                    .cmp(b["name"].as_str().unwrap_or_default())
            });
            Ok(serde_json::json!({"entries": entries}))
        },
    );

    registry.register(
        "filesystem.getHome",
        &[],
        |_ctx: RequestContext, _params: Value| async move {
            let home = dirs::home_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "/".into());
            Ok(serde_json::json!({"home": home}))
        },
    );

    registry.register(
        "filesystem.createDir",
        &["path"],
        |_ctx: RequestContext, params: Value| async move {
            let path = str_param(&params, "path")?;
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| RpcError::invalid_params(format!("cannot create {path}: {e}")))?;
            Ok(serde_json::json!({"created": true}))
        },
    );

    registry.register(
        "file.read",
        &["path"],
        |_ctx: RequestContext, params: Value| async move {
            let path = str_param(&params, "path")?;
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| RpcError::not_found(format!("cannot read {path}: {e}")))?;

            let offset = opt_u64_param(&params, "offset").unwrap_or(1) as usize;
            let limit = opt_u64_param(&params, "limit").map(|l| l as usize);
            let selected = match limit {
                None if offset <= 1 => content,
                _ => {
                    let lines: Vec<&str> = content.lines().collect();
                    let start = offset.saturating_sub(1).min(lines.len());
                    let end = limit
                        .map(|l| (start + l).min(lines.len()))
                        .unwrap_or(lines.len());
                    lines[start..end].join("\n")
                }
            };
            Ok(serde_json::json!({"content": selected}))
        },
    );
}
