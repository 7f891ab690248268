//! `worktree.*` — directory coordination, status, commit, merge.

use serde_json::Value;

use sb_events::{
    EventPayload, WorktreeAcquiredPayload, WorktreeCommitPayload, WorktreeMergedPayload,
};

use crate::rpc::{opt_str_param, str_param, MethodRegistry, RequestContext};

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "worktree.getStatus",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let session = ctx.state.orchestrator.resume(&session_id)?;

            // First status call acquires the directory lazily.
            if ctx.state.worktrees.get(&session_id).is_none() {
                let info = ctx
                    .state
                    .worktrees
                    .acquire(&session_id, &session.working_directory)
                    .await?;
                ctx.state.store.append(
                    &session_id,
                    EventPayload::WorktreeAcquired(WorktreeAcquiredPayload {
                        path: info.path.clone(),
                        branch: info.branch.clone(),
                        base_commit: info.base_commit.clone(),
                        isolated: info.isolated,
                    }),
                )?;
            }

            let status = ctx.state.worktrees.status(&session_id).await?;
            Ok(serde_json::to_value(&status).unwrap_or_default())
        },
    );

    registry.register(
        "worktree.commit",
        &["sessionId", "message"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let message = str_param(&params, "message")?;
            let commit = ctx.state.worktrees.commit(&session_id, &message).await?;
            let info = ctx.state.worktrees.get(&session_id);
            ctx.state.store.append(
                &session_id,
                EventPayload::WorktreeCommit(WorktreeCommitPayload {
                    path: info.map(|i| i.path).unwrap_or_default(),
                    commit: commit.clone(),
                    message,
                }),
            )?;
            Ok(serde_json::json!({"commit": commit}))
        },
    );

    registry.register(
        "worktree.merge",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let info = ctx.state.worktrees.get(&session_id);
            let commit = ctx.state.worktrees.merge(&session_id).await?;
            ctx.state.store.append(
                &session_id,
                EventPayload::WorktreeMerged(WorktreeMergedPayload {
                    path: info
                        .as_ref()
                        .map(|i| i.path.clone())
                        .unwrap_or_default(),
                    into_branch: opt_str_param(&params, "intoBranch")
                        .unwrap_or_else(|| "main".into()),
                    commit: commit.clone(),
                }),
            )?;
            Ok(serde_json::json!({"mergeCommit": commit}))
        },
    );

    registry.register(
        "worktree.list",
        &[],
        |ctx: RequestContext, _params: Value| async move {
            let held: Vec<Value> = ctx
                .state
                .worktrees
                .list()
                .into_iter()
                .map(|(session_id, info)| {
                    let mut json = serde_json::to_value(&info).unwrap_or_default();
                    json["sessionId"] = Value::String(session_id);
                    json
                })
                .collect();
            Ok(serde_json::json!({"worktrees": held}))
        },
    );
}
