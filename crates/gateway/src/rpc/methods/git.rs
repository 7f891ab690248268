//! `git.clone` — clone a repository into a directory.

use serde_json::Value;

use crate::rpc::{str_param, MethodRegistry, RequestContext, RpcError};

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "git.clone",
        &["url", "directory"],
        |_ctx: RequestContext, params: Value| async move {
            let url = str_param(&params, "url")?;
            let directory = str_param(&params, "directory")?;

            let output = tokio::process::Command::new("git")
                .args(["clone", &url, &directory])
                .output()
                .await
                .map_err(|e| {
                    RpcError::new(
                        sb_domain::error::ErrorCode::Internal,
                        format!("git spawn failed: {e}"),
                    )
                })?;

            if !output.status.success() {
                return Err(RpcError::invalid_params(format!(
                    "git clone failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            Ok(serde_json::json!({"cloned": true, "directory": directory}))
        },
    );
}
