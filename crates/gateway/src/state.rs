use std::sync::Arc;
use std::time::Instant;

use sb_domain::config::Config;
use sb_events::EventStore;
use sb_providers::auth::AuthStore;
use sb_providers::ProviderRegistry;

use crate::memory::MemoryFacade;
use crate::rpc::MethodRegistry;
use crate::runtime::worktree::WorktreeCoordinator;
use crate::runtime::Orchestrator;
use crate::skills::SkillRegistry;
use crate::ws::ClientRegistry;

/// Shared application state passed to all RPC handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, event store, LLM providers, auth
/// - **Runtime** — orchestrator (active sessions, turn loop, subagents)
/// - **Collaborators** — worktrees, skills, memory facade
/// - **Protocol** — the method registry (built once at startup) and the
///   connected client registry
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<EventStore>,
    pub providers: Arc<ProviderRegistry>,
    pub auth: Arc<AuthStore>,

    // ── Runtime ───────────────────────────────────────────────────
    pub orchestrator: Arc<Orchestrator>,

    // ── Collaborators ─────────────────────────────────────────────
    pub worktrees: Arc<WorktreeCoordinator>,
    pub skills: Arc<SkillRegistry>,
    pub memory: Arc<MemoryFacade>,

    // ── Protocol ──────────────────────────────────────────────────
    pub rpc: Arc<MethodRegistry>,
    pub clients: Arc<ClientRegistry>,
    pub started_at: Instant,
}
