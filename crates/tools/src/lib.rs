//! Tool system: the [`Tool`] trait, the registry with its denial layer,
//! and the executor that validates arguments, enforces timeouts, and
//! propagates cancellation.

pub mod exec;
pub mod file_ops;
pub mod registry;

mod executor;

pub use executor::{ExecutedTool, ToolExecutor};
pub use registry::{DenialPolicy, ToolRegistry};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sb_domain::error::Result;
use sb_domain::tool::{ToolDefinition, ToolResult};

/// Execution context passed to every tool invocation.
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Unique id of this tool call (matches the `tool.call` event).
    pub tool_call_id: String,
    pub session_id: String,
    /// Working directory for path resolution.
    pub working_directory: String,
    /// Cooperative cancellation; tools check it at their own suspension
    /// points and terminate child processes when it fires.
    pub cancellation: CancellationToken,
}

/// The trait every tool implements.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Tool name — the exact string sent to/from the LLM.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> Value;

    /// Whether this tool may run concurrently with other parallel-safe
    /// tools dispatched in the same response.
    fn parallel_safe(&self) -> bool {
        false
    }

    /// Per-tool timeout override (ms); `None` uses the configured default.
    fn timeout_ms(&self) -> Option<u64> {
        None
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult>;
}

/// The schema sent to the model for a registered tool.
pub fn definition_of(tool: &dyn Tool) -> ToolDefinition {
    ToolDefinition {
        name: tool.name().to_owned(),
        description: tool.description().to_owned(),
        parameters: tool.parameters(),
    }
}
