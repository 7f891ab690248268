//! Startup wiring: config → stores → registries → orchestrator → state.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use sb_domain::config::{Config, ConfigSeverity};
use sb_events::EventStore;
use sb_hooks::HookEngine;
use sb_providers::auth::AuthStore;
use sb_providers::ProviderRegistry;
use sb_tools::exec::BashTool;
use sb_tools::file_ops::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use sb_tools::{DenialPolicy, ToolExecutor, ToolRegistry};

use crate::memory::MemoryFacade;
use crate::rpc::MethodRegistry;
use crate::runtime::orchestrator::{Orchestrator, TurnDeps};
use crate::runtime::worktree::WorktreeCoordinator;
use crate::skills::SkillRegistry;
use crate::state::AppState;
use crate::ws::ClientRegistry;

/// Load the config file, falling back to defaults when absent.
pub fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => Config::default(),
    };

    let mut fatal = false;
    for issue in config.validate() {
        match issue.severity {
            ConfigSeverity::Error => {
                tracing::error!("{issue}");
                fatal = true;
            }
            ConfigSeverity::Warning => tracing::warn!("{issue}"),
        }
    }
    if fatal {
        anyhow::bail!("configuration is invalid");
    }
    Ok(config)
}

/// Assemble the full application state.
pub fn build_state(config: Config) -> anyhow::Result<AppState> {
    let config = Arc::new(config);
    let data_dir = config.resolved_data_dir();

    let store = Arc::new(
        EventStore::open(&data_dir.join("switchboard.db"))
            .map_err(|e| anyhow::anyhow!("opening event store: {e}"))?,
    );
    let auth = Arc::new(AuthStore::open(&data_dir)?);
    let providers = Arc::new(ProviderRegistry::from_config(&config.llm));
    if providers.is_empty() {
        tracing::warn!("no providers available; prompts will fail until one is configured");
    }

    let mut tool_registry = ToolRegistry::new();
    tool_registry.register(Arc::new(BashTool::new(&config.tools)));
    tool_registry.register(Arc::new(ReadFileTool));
    tool_registry.register(Arc::new(WriteFileTool));
    tool_registry.register(Arc::new(EditFileTool));
    tool_registry.register(Arc::new(ListDirTool));
    let tools = Arc::new(ToolExecutor::new(
        Arc::new(tool_registry),
        config.tools.clone(),
    ));
    let denial = Arc::new(DenialPolicy::from_config(&config.tools));

    let skills = Arc::new(SkillRegistry::new(data_dir.join("skills")));
    let hooks = Arc::new(HookEngine::new());

    let orchestrator = Orchestrator::new(TurnDeps {
        store: store.clone(),
        providers: providers.clone(),
        tools,
        denial,
        hooks,
        skills: skills.clone(),
        config: config.clone(),
    });

    Ok(AppState {
        worktrees: WorktreeCoordinator::new(config.worktrees.clone()),
        config,
        store,
        providers,
        auth,
        orchestrator,
        skills,
        memory: Arc::new(MemoryFacade),
        rpc: Arc::new(MethodRegistry::build()),
        clients: Arc::new(ClientRegistry::default()),
        started_at: Instant::now(),
    })
}

/// The axum router: one WS route is the whole protocol surface.
pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/v1/ws", axum::routing::get(crate::ws::rpc_ws))
        .with_state(state)
}

/// Serve until the process is stopped.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "switchboard listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
