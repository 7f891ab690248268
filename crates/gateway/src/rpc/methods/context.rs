//! `context.*` — snapshots, compaction control, admission, clear.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sb_context::{compaction, estimate_tokens};

use crate::rpc::{opt_str_param, opt_u64_param, str_param, MethodRegistry, RequestContext};
use crate::runtime::compact;
use crate::runtime::turn;

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "context.getSnapshot",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let session = ctx.state.orchestrator.resume(&session_id)?;
            let budget = session.budget.lock();
            Ok(serde_json::json!({
                "currentTokens": budget.current_tokens(),
                "windowTokens": budget.window_tokens(),
                "usageFraction": budget.usage_fraction(),
                "zone": budget.zone(),
            }))
        },
    );

    registry.register(
        "context.getDetailedSnapshot",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let session = ctx.state.orchestrator.resume(&session_id)?;
            let messages =
                turn::reconstruct(ctx.state.orchestrator.deps(), &session_id)?;
            let estimated = estimate_tokens(&messages);
            let (current, window, fraction, zone) = {
                let budget = session.budget.lock();
                (
                    budget.current_tokens(),
                    budget.window_tokens(),
                    budget.usage_fraction(),
                    budget.zone(),
                )
            };
            Ok(serde_json::json!({
                "currentTokens": current,
                "windowTokens": window,
                "usageFraction": fraction,
                "zone": zone,
                "messageCount": messages.len(),
                "estimatedMessageTokens": estimated,
                "turns": compaction::count_turns(&messages),
                "todos": session.todos.lock().len(),
            }))
        },
    );

    registry.register(
        "context.shouldCompact",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let session = ctx.state.orchestrator.resume(&session_id)?;
            let should = session.budget.lock().should_compact();
            Ok(serde_json::json!({"shouldCompact": should}))
        },
    );

    registry.register(
        "context.previewCompaction",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let session = ctx.state.orchestrator.resume(&session_id)?;
            let deps = ctx.state.orchestrator.deps();
            let messages = turn::reconstruct(deps, &session_id)?;

            let model = deps
                .providers
                .summarizer_model()
                .map(str::to_owned)
                .unwrap_or_else(|| session.model.read().clone());
            let (provider, model_name) = deps.providers.resolve(&model)?;
            let current = session.budget.lock().current_tokens();

            let preview = compaction::preview(
                provider.as_ref(),
                &model_name,
                &messages,
                deps.config.compaction.preserve_recent_turns,
                deps.config.compaction.max_summary_tokens,
                current,
                CancellationToken::new(),
            )
            .await?;
            Ok(serde_json::to_value(&preview).unwrap_or_default())
        },
    );

    registry.register(
        "context.confirmCompaction",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let session = ctx.state.orchestrator.resume(&session_id)?;
            let boundary = compact::execute_compaction(
                ctx.state.orchestrator.deps(),
                &session,
                CancellationToken::new(),
            )
            .await?;
            Ok(serde_json::to_value(&boundary).unwrap_or_default())
        },
    );

    registry.register(
        "context.canAcceptTurn",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let estimated = opt_u64_param(&params, "estimatedResponseTokens").unwrap_or(8_192);
            let session = ctx.state.orchestrator.resume(&session_id)?;
            let admission = session.budget.lock().can_accept_turn(estimated);
            Ok(serde_json::to_value(admission).unwrap_or_default())
        },
    );

    registry.register(
        "context.clear",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let reason = opt_str_param(&params, "reason").unwrap_or_else(|| "user".into());
            let payload = ctx.state.orchestrator.clear_context(&session_id, &reason)?;
            Ok(serde_json::to_value(&payload).unwrap_or_default())
        },
    );
}
