//! Method registry and dispatch behavior at the RPC boundary.

use std::sync::Arc;
use std::time::Instant;

use sb_domain::config::Config;
use sb_events::EventStore;
use sb_gateway::memory::MemoryFacade;
use sb_gateway::rpc::{MethodRegistry, RequestContext, RpcRequest};
use sb_gateway::runtime::orchestrator::{Orchestrator, TurnDeps};
use sb_gateway::runtime::worktree::WorktreeCoordinator;
use sb_gateway::skills::SkillRegistry;
use sb_gateway::state::AppState;
use sb_gateway::ws::{ClientConnection, ClientRegistry};
use sb_hooks::HookEngine;
use sb_providers::mock::MockProvider;
use sb_providers::ProviderRegistry;
use sb_tools::{DenialPolicy, ToolExecutor, ToolRegistry};

fn test_state() -> AppState {
    let config = Arc::new(Config::default());
    let store = Arc::new(EventStore::open_in_memory().unwrap());

    let mut providers = ProviderRegistry::empty();
    providers.register(Arc::new(MockProvider::scripted("mock", vec![])));
    let providers = Arc::new(providers);

    let tools = Arc::new(ToolExecutor::new(
        Arc::new(ToolRegistry::new()),
        config.tools.clone(),
    ));
    let skills_dir = std::env::temp_dir().join("sb-rpc-test-skills");
    let orchestrator = Orchestrator::new(TurnDeps {
        store: store.clone(),
        providers: providers.clone(),
        tools,
        denial: Arc::new(DenialPolicy::default()),
        hooks: Arc::new(HookEngine::new()),
        skills: Arc::new(SkillRegistry::new(skills_dir.clone())),
        config: config.clone(),
    });

    AppState {
        worktrees: WorktreeCoordinator::new(config.worktrees.clone()),
        config,
        store,
        providers,
        auth: Arc::new(
            sb_providers::auth::AuthStore::open(
                &std::env::temp_dir().join("sb-rpc-test-auth"),
            )
            .unwrap(),
        ),
        orchestrator,
        skills: Arc::new(SkillRegistry::new(skills_dir)),
        memory: Arc::new(MemoryFacade),
        rpc: Arc::new(MethodRegistry::build()),
        clients: Arc::new(ClientRegistry::default()),
        started_at: Instant::now(),
    }
}

fn ctx(state: &AppState) -> RequestContext {
    RequestContext {
        state: state.clone(),
        client: ClientConnection::detached(),
    }
}

async fn call(
    registry: &MethodRegistry,
    state: &AppState,
    method: &str,
    params: serde_json::Value,
) -> sb_gateway::rpc::RpcResponse {
    registry
        .dispatch(
            ctx(state),
            RpcRequest {
                id: serde_json::json!(1),
                method: method.into(),
                params,
            },
        )
        .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_method_is_not_found() {
    let state = test_state();
    let registry = state.rpc.clone();
    let response = call(&registry, &state, "nope.nothing", serde_json::json!({})).await;
    assert!(!response.success);
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["error"]["code"], "NOT_FOUND");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_required_param_fails_before_dispatch() {
    let state = test_state();
    let registry = state.rpc.clone();
    let response = call(&registry, &state, "session.create", serde_json::json!({})).await;
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["error"]["code"], "INVALID_PARAMS");
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("workingDirectory"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_namespace_set_is_registered() {
    let registry = MethodRegistry::build();
    let names = registry.method_names();
    for expected in [
        "session.create",
        "session.resume",
        "session.list",
        "session.delete",
        "session.fork",
        "session.switchModel",
        "session.setPlanMode",
        "agent.prompt",
        "agent.abort",
        "agent.getState",
        "events.getHistory",
        "events.getSince",
        "events.append",
        "events.subscribe",
        "events.unsubscribe",
        "context.getSnapshot",
        "context.getDetailedSnapshot",
        "context.shouldCompact",
        "context.previewCompaction",
        "context.confirmCompaction",
        "context.canAcceptTurn",
        "context.clear",
        "tree.getVisualization",
        "tree.getBranches",
        "tree.getSubtree",
        "tree.getAncestors",
        "search.content",
        "search.events",
        "skill.list",
        "skill.get",
        "skill.refresh",
        "skill.remove",
        "worktree.getStatus",
        "worktree.commit",
        "worktree.merge",
        "worktree.list",
        "memory.search",
        "memory.addEntry",
        "memory.getHandoffs",
        "message.delete",
        "todo.list",
        "todo.getSummary",
        "todo.getBacklog",
        "todo.restore",
        "todo.getBacklogCount",
        "filesystem.listDir",
        "filesystem.getHome",
        "filesystem.createDir",
        "file.read",
        "git.clone",
        "transcribe.audio",
        "transcribe.listModels",
        "sandbox.listContainers",
        "sandbox.stopContainer",
        "sandbox.startContainer",
        "sandbox.killContainer",
        "tool.result",
        "client.identify",
        "client.list",
        "system.ping",
        "system.getInfo",
    ] {
        assert!(names.contains(&expected), "missing method {expected}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_lifecycle_over_rpc() {
    let state = test_state();
    let registry = state.rpc.clone();

    let created = call(
        &registry,
        &state,
        "session.create",
        serde_json::json!({"workingDirectory": "/tmp/rpc", "model": "mock/m"}),
    )
    .await;
    assert!(created.success);
    let session_id = created.result.unwrap()["id"].as_str().unwrap().to_owned();

    let listed = call(&registry, &state, "session.list", serde_json::json!({})).await;
    let sessions = listed.result.unwrap();
    assert_eq!(sessions["sessions"].as_array().unwrap().len(), 1);

    let get_state = call(
        &registry,
        &state,
        "agent.getState",
        serde_json::json!({"sessionId": session_id}),
    )
    .await;
    let info = get_state.result.unwrap();
    assert_eq!(info["isRunning"], false);
    assert_eq!(info["model"], "mock/m");

    let deleted = call(
        &registry,
        &state,
        "session.delete",
        serde_json::json!({"sessionId": session_id}),
    )
    .await;
    assert!(deleted.success);

    // Ended sessions drop out of the default listing; events persist.
    let listed = call(&registry, &state, "session.list", serde_json::json!({})).await;
    assert_eq!(
        listed.result.unwrap()["sessions"].as_array().unwrap().len(),
        0
    );
    let history = call(
        &registry,
        &state,
        "events.getHistory",
        serde_json::json!({"sessionId": session_id}),
    )
    .await;
    assert!(history.success);
    assert!(!history.result.unwrap()["events"].as_array().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn plan_mode_round_trip_over_rpc() {
    let state = test_state();
    let registry = state.rpc.clone();

    let created = call(
        &registry,
        &state,
        "session.create",
        serde_json::json!({"workingDirectory": "/tmp/plan", "model": "mock/m"}),
    )
    .await;
    let session_id = created.result.unwrap()["id"].as_str().unwrap().to_owned();

    // Enter plan mode; getState reflects it.
    let entered = call(
        &registry,
        &state,
        "session.setPlanMode",
        serde_json::json!({"sessionId": session_id, "enabled": true}),
    )
    .await;
    assert!(entered.success);
    assert_eq!(entered.result.unwrap()["planMode"], true);

    let info = call(
        &registry,
        &state,
        "agent.getState",
        serde_json::json!({"sessionId": session_id}),
    )
    .await;
    assert_eq!(info.result.unwrap()["planMode"], true);

    // Setting it again is a no-op; leaving it flips back.
    call(
        &registry,
        &state,
        "session.setPlanMode",
        serde_json::json!({"sessionId": session_id, "enabled": true}),
    )
    .await;
    call(
        &registry,
        &state,
        "session.setPlanMode",
        serde_json::json!({"sessionId": session_id, "enabled": false}),
    )
    .await;

    let info = call(
        &registry,
        &state,
        "agent.getState",
        serde_json::json!({"sessionId": session_id}),
    )
    .await;
    assert_eq!(info.result.unwrap()["planMode"], false);

    // Exactly one entered/exited event pair landed on the log.
    let history = call(
        &registry,
        &state,
        "events.getHistory",
        serde_json::json!({"sessionId": session_id}),
    )
    .await;
    let events = history.result.unwrap();
    let count = |ty: &str| {
        events["events"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|e| e["type"] == ty)
            .count()
    };
    assert_eq!(count("plan.mode_entered"), 1);
    assert_eq!(count("plan.mode_exited"), 1);

    // A non-boolean flag is rejected before dispatch reaches the state.
    let bad = call(
        &registry,
        &state,
        "session.setPlanMode",
        serde_json::json!({"sessionId": session_id, "enabled": "yes"}),
    )
    .await;
    let json = serde_json::to_value(&bad).unwrap();
    assert_eq!(json["error"]["code"], "INVALID_PARAMS");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn events_append_with_stale_head_conflicts() {
    let state = test_state();
    let registry = state.rpc.clone();

    let created = call(
        &registry,
        &state,
        "session.create",
        serde_json::json!({"workingDirectory": "/tmp/cas", "model": "mock/m"}),
    )
    .await;
    let session_id = created.result.unwrap()["id"].as_str().unwrap().to_owned();
    let stale_head = state
        .store
        .get_session(&session_id)
        .unwrap()
        .unwrap()
        .head_event_id
        .unwrap();

    let first = call(
        &registry,
        &state,
        "events.append",
        serde_json::json!({
            "sessionId": session_id,
            "type": "message.system",
            "payload": {"content": "first"},
            "expectedHeadId": stale_head,
        }),
    )
    .await;
    assert!(first.success);

    let second = call(
        &registry,
        &state,
        "events.append",
        serde_json::json!({
            "sessionId": session_id,
            "type": "message.system",
            "payload": {"content": "second"},
            "expectedHeadId": stale_head,
        }),
    )
    .await;
    let json = serde_json::to_value(&second).unwrap();
    assert_eq!(json["error"]["code"], "CONFLICT");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stub_namespaces_answer_not_available() {
    let state = test_state();
    let registry = state.rpc.clone();
    for (method, params) in [
        ("transcribe.listModels", serde_json::json!({})),
        ("sandbox.listContainers", serde_json::json!({})),
        (
            "tool.result",
            serde_json::json!({"toolCallId": "c1", "content": "x"}),
        ),
    ] {
        let response = call(&registry, &state, method, params).await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"]["code"], "NOT_AVAILABLE", "{method}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn memory_stub_returns_empty_results() {
    let state = test_state();
    let registry = state.rpc.clone();
    let response = call(
        &registry,
        &state,
        "memory.search",
        serde_json::json!({"query": "anything"}),
    )
    .await;
    assert!(response.success);
    assert!(response.result.unwrap()["results"]
        .as_array()
        .unwrap()
        .is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn confirm_compaction_rewrites_visible_history() {
    let state = {
        // The summarizer call pops the mock's one scripted turn.
        let config = Arc::new(Config::default());
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let mut providers = ProviderRegistry::empty();
        providers.register(Arc::new(MockProvider::scripted(
            "mock",
            vec![MockProvider::text_turn("Work so far: built the parser.", 40, 10)],
        )));
        let providers = Arc::new(providers);
        let tools = Arc::new(ToolExecutor::new(
            Arc::new(ToolRegistry::new()),
            config.tools.clone(),
        ));
        let skills_dir = std::env::temp_dir().join("sb-rpc-compact-skills");
        let orchestrator = Orchestrator::new(TurnDeps {
            store: store.clone(),
            providers: providers.clone(),
            tools,
            denial: Arc::new(DenialPolicy::default()),
            hooks: Arc::new(HookEngine::new()),
            skills: Arc::new(SkillRegistry::new(skills_dir.clone())),
            config: config.clone(),
        });
        AppState {
            worktrees: WorktreeCoordinator::new(config.worktrees.clone()),
            config,
            store,
            providers,
            auth: Arc::new(
                sb_providers::auth::AuthStore::open(
                    &std::env::temp_dir().join("sb-rpc-compact-auth"),
                )
                .unwrap(),
            ),
            orchestrator,
            skills: Arc::new(SkillRegistry::new(skills_dir)),
            memory: Arc::new(MemoryFacade),
            rpc: Arc::new(MethodRegistry::build()),
            clients: Arc::new(ClientRegistry::default()),
            started_at: Instant::now(),
        }
    };
    let registry = state.rpc.clone();

    let created = call(
        &registry,
        &state,
        "session.create",
        serde_json::json!({"workingDirectory": "/tmp/compact", "model": "mock/m"}),
    )
    .await;
    let session_id = created.result.unwrap()["id"].as_str().unwrap().to_owned();

    // Ten turns of history; defaults preserve the last six.
    for i in 0..10 {
        for (ty, payload) in [
            (
                "message.user",
                serde_json::json!({"content": [{"type": "text", "text": format!("question {i}")}]}),
            ),
            (
                "message.assistant",
                serde_json::json!({
                    "content": [{"type": "text", "text": format!("answer {i}")}],
                    "stopReason": "end_turn",
                }),
            ),
        ] {
            let appended = call(
                &registry,
                &state,
                "events.append",
                serde_json::json!({"sessionId": session_id, "type": ty, "payload": payload}),
            )
            .await;
            assert!(appended.success);
        }
    }

    let confirmed = call(
        &registry,
        &state,
        "context.confirmCompaction",
        serde_json::json!({"sessionId": session_id}),
    )
    .await;
    assert!(confirmed.success, "compaction failed: {confirmed:?}");
    let boundary = confirmed.result.unwrap();
    assert!(boundary["compactedTokens"].as_u64().unwrap() < boundary["originalTokens"].as_u64().unwrap());
    assert!(boundary["compressionRatio"].as_f64().unwrap() < 1.0);

    // Reconstruction: synthetic summary system message, then the
    // preserved recent turns.
    let head = state
        .store
        .get_session(&session_id)
        .unwrap()
        .unwrap()
        .head_event_id
        .unwrap();
    let mut chain = state.store.get_ancestors(&head).unwrap();
    chain.reverse();
    let messages = sb_events::reconstruct_messages(&chain);

    assert_eq!(messages[0].role, sb_domain::message::Role::System);
    assert!(messages[0].text().contains("built the parser"));
    // 6 preserved turns × 2 messages follow the summary.
    assert_eq!(messages.len(), 13);
    assert!(messages[1].text().contains("question 4"));
    assert!(messages.last().unwrap().text().contains("answer 9"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fork_over_rpc_shares_prefix() {
    let state = test_state();
    let registry = state.rpc.clone();

    let created = call(
        &registry,
        &state,
        "session.create",
        serde_json::json!({"workingDirectory": "/tmp/fork", "model": "mock/m"}),
    )
    .await;
    let session_id = created.result.unwrap()["id"].as_str().unwrap().to_owned();

    call(
        &registry,
        &state,
        "events.append",
        serde_json::json!({
            "sessionId": session_id,
            "type": "message.user",
            "payload": {"content": [{"type": "text", "text": "shared"}]},
        }),
    )
    .await;

    let forked = call(
        &registry,
        &state,
        "session.fork",
        serde_json::json!({"sessionId": session_id}),
    )
    .await;
    assert!(forked.success);
    let child_id = forked.result.unwrap()["newSessionId"]
        .as_str()
        .unwrap()
        .to_owned();
    assert_ne!(child_id, session_id);

    let ancestors = call(
        &registry,
        &state,
        "tree.getAncestors",
        serde_json::json!({
            "eventId": state
                .store
                .get_session(&child_id)
                .unwrap()
                .unwrap()
                .head_event_id
                .unwrap(),
        }),
    )
    .await;
    let events = ancestors.result.unwrap();
    let sessions: Vec<&str> = events["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["sessionId"].as_str().unwrap())
        .collect();
    // The chain crosses from the child into the donor.
    assert!(sessions.contains(&child_id.as_str()));
    assert!(sessions.contains(&session_id.as_str()));
}
