//! Runtime: the session orchestrator, the agent turn loop, the streaming
//! bus, subagents, worktrees, and compaction execution.

pub mod bus;
pub mod compact;
pub mod orchestrator;
pub mod subagent;
pub mod turn;
pub mod worktree;

pub use bus::Notification;
pub use orchestrator::{ActiveSession, Orchestrator};
