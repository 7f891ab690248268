//! End-to-end turn-loop scenarios against a scripted provider.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sb_domain::config::Config;
use sb_domain::stream::StopReason;
use sb_events::{EventPayload, EventStore, EventType, HistoryOptions};
use sb_gateway::memory::MemoryFacade;
use sb_gateway::rpc::MethodRegistry;
use sb_gateway::runtime::orchestrator::{Orchestrator, TurnDeps};
use sb_gateway::runtime::worktree::WorktreeCoordinator;
use sb_gateway::skills::SkillRegistry;
use sb_gateway::state::AppState;
use sb_gateway::ws::ClientRegistry;
use sb_hooks::{Hook, HookEngine, HookMode, HookOutcome, HookType};
use sb_providers::mock::MockProvider;
use sb_providers::ProviderRegistry;
use sb_tools::exec::BashTool;
use sb_tools::file_ops::ReadFileTool;
use sb_tools::{DenialPolicy, ToolExecutor, ToolRegistry};

fn test_state(mock: MockProvider, hooks: HookEngine) -> AppState {
    let config = Arc::new(Config::default());
    let store = Arc::new(EventStore::open_in_memory().unwrap());

    let mut providers = ProviderRegistry::empty();
    providers.register(Arc::new(mock));
    let providers = Arc::new(providers);

    let mut tool_registry = ToolRegistry::new();
    tool_registry.register(Arc::new(BashTool::new(&config.tools)));
    tool_registry.register(Arc::new(ReadFileTool));
    let tools = Arc::new(ToolExecutor::new(
        Arc::new(tool_registry),
        config.tools.clone(),
    ));

    let skills_dir = std::env::temp_dir().join("sb-test-skills-none");
    let orchestrator = Orchestrator::new(TurnDeps {
        store: store.clone(),
        providers: providers.clone(),
        tools,
        denial: Arc::new(DenialPolicy::default()),
        hooks: Arc::new(hooks),
        skills: Arc::new(SkillRegistry::new(skills_dir)),
        config: config.clone(),
    });

    AppState {
        worktrees: WorktreeCoordinator::new(config.worktrees.clone()),
        config,
        store,
        providers,
        auth: Arc::new(
            sb_providers::auth::AuthStore::open(&std::env::temp_dir().join("sb-test-auth"))
                .unwrap(),
        ),
        orchestrator,
        skills: Arc::new(SkillRegistry::new(
            std::env::temp_dir().join("sb-test-skills-none"),
        )),
        memory: Arc::new(MemoryFacade),
        rpc: Arc::new(MethodRegistry::build()),
        clients: Arc::new(ClientRegistry::default()),
        started_at: Instant::now(),
    }
}

/// Poll the session's chronological history until `pred` passes.
async fn wait_for_events(
    state: &AppState,
    session_id: &str,
    pred: impl Fn(&[sb_events::Event]) -> bool,
    timeout: Duration,
) -> Vec<sb_events::Event> {
    let deadline = Instant::now() + timeout;
    loop {
        let page = state
            .store
            .get_history(
                session_id,
                &HistoryOptions {
                    chronological: true,
                    limit: Some(1_000),
                    ..Default::default()
                },
            )
            .unwrap();
        if pred(&page.events) {
            return page.events;
        }
        if Instant::now() > deadline {
            let types: Vec<&str> = page.events.iter().map(|e| e.event_type().as_str()).collect();
            panic!("timed out waiting for events; saw: {types:?}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn types_of(events: &[sb_events::Event]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type().as_str()).collect()
}

// ── S1: simple completion ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simple_completion_event_sequence() {
    let mock = MockProvider::scripted("mock", vec![MockProvider::text_turn("Hi", 12, 3)]);
    let state = test_state(mock, HookEngine::new());

    let record = state
        .orchestrator
        .create_session("/tmp/s1", Some("mock/test-model"), None)
        .await
        .unwrap();
    state
        .orchestrator
        .prompt(&record.id, "Say hi in one word.".into(), Vec::new())
        .await
        .unwrap();

    let events = wait_for_events(
        &state,
        &record.id,
        |events| {
            events
                .iter()
                .any(|e| e.event_type() == EventType::StreamTurnEnd)
        },
        Duration::from_secs(5),
    )
    .await;

    let types = types_of(&events);
    assert_eq!(types[0], "session.start");
    assert!(types.contains(&"message.user"));
    assert!(types.contains(&"stream.turn_start"));
    assert!(types.contains(&"stream.text_delta"));
    assert!(types.contains(&"message.assistant"));
    assert!(types.contains(&"stream.turn_end"));

    // Ordering: turn_start before deltas before turn_end.
    let pos = |t: &str| types.iter().position(|x| *x == t).unwrap();
    assert!(pos("stream.turn_start") < pos("stream.text_delta"));
    assert!(pos("stream.text_delta") < pos("stream.turn_end"));

    // The assistant message carries the streamed text and a clean stop.
    let assistant = events
        .iter()
        .find(|e| e.event_type() == EventType::MessageAssistant)
        .unwrap();
    match &assistant.payload {
        EventPayload::MessageAssistant(p) => {
            assert_eq!(p.stop_reason, StopReason::EndTurn);
            assert!(!p.incomplete);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    // turn_end carries both the legacy triple and the canonical record.
    let turn_end = events
        .iter()
        .find(|e| e.event_type() == EventType::StreamTurnEnd)
        .unwrap();
    match &turn_end.payload {
        EventPayload::StreamTurnEnd(p) => {
            assert_eq!(p.turn, 1);
            let record = p.token_record.as_ref().expect("tokenRecord is canonical");
            assert_eq!(record.computed.output_tokens, 3);
            assert_eq!(p.token_usage.output_tokens, 3);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    // Final state: two visible messages, not running.
    let mut chain = events.clone();
    chain.sort_by_key(|e| e.sequence);
    let messages = sb_events::reconstruct_messages(&chain);
    assert_eq!(messages.len(), 2);

    // The drainer flips the running flag just after the loop returns.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let session = state.orchestrator.get_active(&record.id).unwrap();
    assert!(!session.running.load(std::sync::atomic::Ordering::SeqCst));
}

// ── S2: tool use loop ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tool_use_loop_round_trip() {
    let mock = MockProvider::scripted(
        "mock",
        vec![
            MockProvider::tool_turn(
                "toolu_01X",
                "bash",
                &serde_json::json!({"command": "echo hello"}),
            ),
            MockProvider::text_turn("The command printed hello.", 150, 8),
        ],
    );
    let state = test_state(mock, HookEngine::new());

    let record = state
        .orchestrator
        .create_session("/tmp/s2", Some("mock/test-model"), None)
        .await
        .unwrap();
    state
        .orchestrator
        .prompt(&record.id, "Run echo hello".into(), Vec::new())
        .await
        .unwrap();

    let events = wait_for_events(
        &state,
        &record.id,
        |events| {
            // Two turn ends: the tool turn and the final text turn.
            events
                .iter()
                .filter(|e| e.event_type() == EventType::StreamTurnEnd)
                .count()
                == 2
        },
        Duration::from_secs(10),
    )
    .await;

    // tool.call precedes its tool.result, which matches by id.
    let call = events
        .iter()
        .find(|e| e.event_type() == EventType::ToolCall)
        .expect("tool.call present");
    let result = events
        .iter()
        .find(|e| e.event_type() == EventType::ToolResult)
        .expect("tool.result present");
    assert!(call.sequence < result.sequence);

    match (&call.payload, &result.payload) {
        (EventPayload::ToolCall(c), EventPayload::ToolResult(r)) => {
            assert_eq!(c.tool_call_id, "toolu_01X");
            assert_eq!(r.tool_call_id, "toolu_01X");
            assert_eq!(c.tool_name, "bash");
            assert!(r.content.contains("hello"));
            assert!(!r.is_error);
            assert!(r.duration_ms.is_some());
        }
        other => panic!("unexpected payloads: {other:?}"),
    }

    // First assistant message holds the tool_use block; the second is
    // the final answer.
    let assistants: Vec<_> = events
        .iter()
        .filter(|e| e.event_type() == EventType::MessageAssistant)
        .collect();
    assert_eq!(assistants.len(), 2);
    match &assistants[0].payload {
        EventPayload::MessageAssistant(p) => {
            assert_eq!(p.stop_reason, StopReason::ToolUse);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
    match &assistants[1].payload {
        EventPayload::MessageAssistant(p) => {
            assert_eq!(p.stop_reason, StopReason::EndTurn);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

// ── S3: cancellation with partial output ───────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_captures_partial_tool_output() {
    let mock = MockProvider::scripted(
        "mock",
        vec![MockProvider::tool_turn(
            "toolu_slow",
            "bash",
            &serde_json::json!({"command": "echo started; sleep 10; echo done"}),
        )],
    );
    let state = test_state(mock, HookEngine::new());

    let record = state
        .orchestrator
        .create_session("/tmp/s3", Some("mock/test-model"), None)
        .await
        .unwrap();
    state
        .orchestrator
        .prompt(&record.id, "Run the slow thing".into(), Vec::new())
        .await
        .unwrap();

    // Wait for the tool.call to land, then fire the abort.
    wait_for_events(
        &state,
        &record.id,
        |events| events.iter().any(|e| e.event_type() == EventType::ToolCall),
        Duration::from_secs(5),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    state.orchestrator.abort(&record.id).unwrap();

    let events = wait_for_events(
        &state,
        &record.id,
        |events| {
            events
                .iter()
                .any(|e| e.event_type() == EventType::TurnFailed)
        },
        Duration::from_secs(10),
    )
    .await;

    let result = events
        .iter()
        .find(|e| e.event_type() == EventType::ToolResult)
        .expect("interrupted tool.result present");
    match &result.payload {
        EventPayload::ToolResult(r) => {
            assert!(r.is_error);
            let details = r.details.as_ref().unwrap();
            assert_eq!(details["interrupted"], true);
            assert!(details["partialContent"]
                .as_str()
                .unwrap()
                .contains("started"));
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    let failed = events
        .iter()
        .find(|e| e.event_type() == EventType::TurnFailed)
        .unwrap();
    match &failed.payload {
        EventPayload::TurnFailed(p) => {
            assert!(p.interrupted);
            assert!(p.recoverable);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    // No stream deltas after the failure.
    let failed_seq = failed.sequence;
    assert!(events
        .iter()
        .filter(|e| e.event_type() == EventType::StreamTextDelta)
        .all(|e| e.sequence < failed_seq));
}

// ── Token extraction failure ───────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_usage_fails_the_turn() {
    let mock = MockProvider::scripted("mock", vec![MockProvider::usageless_turn("hi")]);
    let state = test_state(mock, HookEngine::new());

    let record = state
        .orchestrator
        .create_session("/tmp/tok", Some("mock/test-model"), None)
        .await
        .unwrap();
    state
        .orchestrator
        .prompt(&record.id, "hello".into(), Vec::new())
        .await
        .unwrap();

    let events = wait_for_events(
        &state,
        &record.id,
        |events| {
            events
                .iter()
                .any(|e| e.event_type() == EventType::TurnFailed)
        },
        Duration::from_secs(5),
    )
    .await;

    let failed = events
        .iter()
        .find(|e| e.event_type() == EventType::TurnFailed)
        .unwrap();
    match &failed.payload {
        EventPayload::TurnFailed(p) => {
            assert_eq!(p.code.as_deref(), Some("TOKEN_EXTRACTION"));
            assert!(!p.recoverable);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

// ── Hook gating ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pre_tool_use_hook_blocks_execution() {
    let mock = MockProvider::scripted(
        "mock",
        vec![
            MockProvider::tool_turn(
                "toolu_gate",
                "bash",
                &serde_json::json!({"command": "echo should-not-run"}),
            ),
            MockProvider::text_turn("understood", 100, 4),
        ],
    );

    let hooks = HookEngine::new();
    hooks.register(Hook {
        name: "no-bash".into(),
        hook_type: HookType::PreToolUse,
        priority: 10,
        mode: HookMode::Blocking,
        handler: Arc::new(|invocation| {
            Box::pin(async move {
                if invocation.payload["toolName"] == "bash" {
                    HookOutcome::Block {
                        reason: "bash disabled for this session".into(),
                    }
                } else {
                    HookOutcome::Continue
                }
            })
        }),
    });
    let state = test_state(mock, hooks);

    let record = state
        .orchestrator
        .create_session("/tmp/hook", Some("mock/test-model"), None)
        .await
        .unwrap();
    state
        .orchestrator
        .prompt(&record.id, "run something".into(), Vec::new())
        .await
        .unwrap();

    let events = wait_for_events(
        &state,
        &record.id,
        |events| {
            events
                .iter()
                .any(|e| e.event_type() == EventType::ToolResult)
        },
        Duration::from_secs(5),
    )
    .await;

    let result = events
        .iter()
        .find(|e| e.event_type() == EventType::ToolResult)
        .unwrap();
    match &result.payload {
        EventPayload::ToolResult(r) => {
            assert!(r.is_error);
            assert!(r.content.contains("blocked by hook"));
            assert!(!r.content.contains("should-not-run"));
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    // The hook run left its bookkeeping events.
    assert!(events
        .iter()
        .any(|e| e.event_type() == EventType::HookTriggered));
    assert!(events
        .iter()
        .any(|e| e.event_type() == EventType::HookCompleted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocked_prompt_never_reaches_the_provider() {
    let mock = MockProvider::scripted("mock", vec![MockProvider::text_turn("hi", 10, 2)]);
    let requests = mock.requests.clone();

    let hooks = HookEngine::new();
    hooks.register(Hook {
        name: "deny-all".into(),
        hook_type: HookType::UserPromptSubmit,
        priority: 0,
        mode: HookMode::Blocking,
        handler: Arc::new(|_invocation| {
            Box::pin(async {
                HookOutcome::Block {
                    reason: "prompts disabled".into(),
                }
            })
        }),
    });
    let state = test_state(mock, hooks);

    let record = state
        .orchestrator
        .create_session("/tmp/blocked", Some("mock/test-model"), None)
        .await
        .unwrap();
    state
        .orchestrator
        .prompt(&record.id, "hello?".into(), Vec::new())
        .await
        .unwrap();

    // The block marker lands; no message.user, no provider call.
    let events = wait_for_events(
        &state,
        &record.id,
        |events| {
            events
                .iter()
                .any(|e| e.event_type() == EventType::MessageSystem)
        },
        Duration::from_secs(5),
    )
    .await;

    assert!(!events
        .iter()
        .any(|e| e.event_type() == EventType::MessageUser));
    assert!(requests.lock().is_empty());
}
