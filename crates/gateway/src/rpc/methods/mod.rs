//! RPC method handlers, one module per namespace.

mod agent;
mod context;
mod events;
mod filesystem;
mod git;
mod memory;
mod message;
mod search;
mod session;
mod skill;
mod stubs;
mod system;
mod todo;
mod tree;
mod worktree;

use crate::rpc::MethodRegistry;

/// Register every namespace (the closed protocol set).
pub fn register_all(registry: &mut MethodRegistry) {
    session::register(registry);
    agent::register(registry);
    events::register(registry);
    context::register(registry);
    tree::register(registry);
    search::register(registry);
    skill::register(registry);
    worktree::register(registry);
    memory::register(registry);
    message::register(registry);
    todo::register(registry);
    filesystem::register(registry);
    git::register(registry);
    system::register(registry);
    stubs::register(registry);
}
