//! The `bash` tool — run a shell command with cancellation and timeout.
//!
//! Output (stdout+stderr interleaved by line) accumulates in a capped
//! buffer so a cancelled or timed-out command still returns what it
//! printed. Termination path on signal: SIGTERM, grace period, SIGKILL.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use sb_domain::config::ToolsConfig;
use sb_domain::error::Result;
use sb_domain::tool::ToolResult;

use crate::{Tool, ToolContext};

pub struct BashTool {
    timeout_ms: u64,
    kill_grace_ms: u64,
    max_output_chars: usize,
}

impl BashTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            timeout_ms: config.default_timeout_ms,
            kill_grace_ms: config.kill_grace_ms,
            max_output_chars: config.max_output_chars,
        }
    }
}

/// Capped output buffer; keeps the newest content when full.
struct OutputBuffer {
    combined: String,
    max_chars: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn new(max_chars: usize) -> Self {
        Self {
            combined: String::new(),
            max_chars,
            truncated: false,
        }
    }

    fn push_line(&mut self, line: &str) {
        self.combined.push_str(line);
        self.combined.push('\n');
        if self.combined.len() > self.max_chars {
            let keep = self.max_chars * 3 / 4;
            let drain_count = self.combined.len() - keep;
            // Find a char boundary to avoid splitting a multi-byte character.
            let mut boundary = drain_count;
            while boundary < self.combined.len() && !self.combined.is_char_boundary(boundary) {
                boundary += 1;
            }
            self.combined.drain(..boundary);
            self.truncated = true;
        }
    }
}

#[async_trait::async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the session's working directory. \
         Returns combined stdout and stderr."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to run",
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Override the default timeout in milliseconds",
                },
            },
            "required": ["command"],
        })
    }

    fn timeout_ms(&self) -> Option<u64> {
        // The tool enforces its own deadline so it can kill the child;
        // give the executor's backstop headroom over the worst case.
        Some(self.timeout_ms + self.kill_grace_ms + 5_000)
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let timeout_ms = args
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .unwrap_or(self.timeout_ms);

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command);
        cmd.current_dir(&ctx.working_directory);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.stdin(std::process::Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(ToolResult::error(format!("failed to spawn: {e}")));
            }
        };

        let output = Arc::new(Mutex::new(OutputBuffer::new(self.max_output_chars)));

        // Line readers for both pipes.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = spawn_reader(stdout, output.clone());
        let err_task = spawn_reader(stderr, output.clone());

        let deadline = tokio::time::sleep(std::time::Duration::from_millis(timeout_ms));
        tokio::pin!(deadline);

        let (interrupted, timed_out, exit_code) = tokio::select! {
            status = child.wait() => {
                let code = status.ok().and_then(|s| s.code());
                (false, false, code)
            }
            _ = ctx.cancellation.cancelled() => {
                let code = terminate(&mut child, self.kill_grace_ms).await;
                (true, false, code)
            }
            _ = &mut deadline => {
                let code = terminate(&mut child, self.kill_grace_ms).await;
                (false, true, code)
            }
        };

        // Drain whatever the readers still hold.
        let _ = out_task.await;
        let _ = err_task.await;

        let (combined, truncated) = {
            let buffer = output.lock();
            (buffer.combined.clone(), buffer.truncated)
        };

        if interrupted {
            tracing::info!(command = %command, "bash command interrupted");
            let partial = (!combined.is_empty()).then_some(combined);
            return Ok(ToolResult::interrupted(partial));
        }
        if timed_out {
            let mut result = ToolResult::timed_out(timeout_ms);
            if !combined.is_empty() {
                result.content = format!(
                    "command timed out after {timeout_ms}ms; partial output:\n{combined}"
                );
            }
            return Ok(result);
        }

        let exit_code = exit_code.unwrap_or(-1);
        let mut details = serde_json::json!({ "exitCode": exit_code });
        if truncated {
            details["truncated"] = Value::Bool(true);
        }
        Ok(ToolResult {
            content: combined,
            is_error: exit_code != 0,
            details: Some(details),
            stop_turn: false,
        })
    }
}

fn spawn_reader<R>(
    pipe: Option<R>,
    output: Arc<Mutex<OutputBuffer>>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(pipe) = pipe {
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                output.lock().push_line(&line);
            }
        }
    })
}

/// SIGTERM the process group, wait out the grace period, SIGKILL
/// stragglers. Returns the exit code when one is observed.
async fn terminate(child: &mut tokio::process::Child, grace_ms: u64) -> Option<i32> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // Negative pid signals the whole process group.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
        let graceful = tokio::time::timeout(
            std::time::Duration::from_millis(grace_ms),
            child.wait(),
        )
        .await;
        if let Ok(Ok(status)) = graceful {
            return status.code();
        }
    }

    let _ = child.start_kill();
    child.wait().await.ok().and_then(|s| s.code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx(dir: &str) -> ToolContext {
        ToolContext {
            tool_call_id: "c1".into(),
            session_id: "s1".into(),
            working_directory: dir.into(),
            cancellation: CancellationToken::new(),
        }
    }

    fn tool() -> BashTool {
        BashTool::new(&ToolsConfig::default())
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let result = tool()
            .execute(serde_json::json!({"command": "echo hello"}), &ctx("/tmp"))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.content.contains("hello"));
        assert_eq!(result.details.unwrap()["exitCode"], 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_result() {
        let result = tool()
            .execute(serde_json::json!({"command": "exit 3"}), &ctx("/tmp"))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.details.unwrap()["exitCode"], 3);
    }

    #[tokio::test]
    async fn stderr_is_captured() {
        let result = tool()
            .execute(
                serde_json::json!({"command": "echo oops 1>&2"}),
                &ctx("/tmp"),
            )
            .await
            .unwrap();
        assert!(result.content.contains("oops"));
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = tool()
            .execute(
                serde_json::json!({"command": "pwd"}),
                &ctx(dir.path().to_str().unwrap()),
            )
            .await
            .unwrap();
        assert!(result
            .content
            .contains(dir.path().file_name().unwrap().to_str().unwrap()));
    }

    #[tokio::test]
    async fn cancellation_preserves_partial_output() {
        let context = ctx("/tmp");
        let cancel = context.cancellation.clone();
        let task = tokio::spawn(async move {
            tool()
                .execute(
                    serde_json::json!({"command": "echo started; sleep 10; echo done"}),
                    &context,
                )
                .await
                .unwrap()
        });

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        cancel.cancel();
        let result = task.await.unwrap();

        assert!(result.is_error);
        let details = result.details.unwrap();
        assert_eq!(details["interrupted"], true);
        assert!(details["partialContent"]
            .as_str()
            .unwrap()
            .contains("started"));
        assert!(!details["partialContent"].as_str().unwrap().contains("done"));
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let result = tool()
            .execute(
                serde_json::json!({"command": "sleep 30", "timeout_ms": 100}),
                &ctx("/tmp"),
            )
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.details.unwrap()["timedOut"], true);
    }

    #[tokio::test]
    async fn output_buffer_caps_and_keeps_tail() {
        let mut buffer = OutputBuffer::new(100);
        for i in 0..50 {
            buffer.push_line(&format!("line-{i:04}"));
        }
        assert!(buffer.truncated);
        assert!(buffer.combined.len() <= 100);
        assert!(buffer.combined.contains("line-0049"));
        assert!(!buffer.combined.contains("line-0000"));
    }
}
