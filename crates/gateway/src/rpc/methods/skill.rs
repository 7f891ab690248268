//! `skill.*` — the skill registry surface.

use serde_json::Value;

use crate::rpc::{str_param, MethodRegistry, RequestContext};

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "skill.list",
        &[],
        |ctx: RequestContext, _params: Value| async move {
            Ok(serde_json::json!({"skills": ctx.state.skills.list()}))
        },
    );

    registry.register(
        "skill.get",
        &["name"],
        |ctx: RequestContext, params: Value| async move {
            let name = str_param(&params, "name")?;
            let skill = ctx.state.skills.get(&name)?;
            Ok(serde_json::json!({
                "name": skill.name,
                "description": skill.description,
                "path": skill.path,
                "content": skill.content,
            }))
        },
    );

    registry.register(
        "skill.refresh",
        &[],
        |ctx: RequestContext, _params: Value| async move {
            let count = ctx.state.skills.refresh();
            Ok(serde_json::json!({"count": count}))
        },
    );

    registry.register(
        "skill.remove",
        &["name"],
        |ctx: RequestContext, params: Value| async move {
            let name = str_param(&params, "name")?;
            ctx.state.skills.remove(&name)?;
            Ok(serde_json::json!({"removed": true}))
        },
    );
}
