//! Memory facade.
//!
//! The memory subsystem's adapters return empty results throughout; the
//! interface stays intact so a real backend can be wired in without
//! touching the RPC surface.

use serde_json::Value;

#[derive(Default)]
pub struct MemoryFacade;

impl MemoryFacade {
    pub fn search(&self, _query: &str, _limit: usize) -> Vec<Value> {
        Vec::new()
    }

    /// Accepted and dropped; returns the would-be entry id for protocol
    /// compatibility.
    pub fn add_entry(&self, _content: &str, _metadata: Option<&Value>) -> String {
        format!("mem_{}", uuid::Uuid::new_v4())
    }

    pub fn get_handoffs(&self, _session_id: Option<&str>) -> Vec<Value> {
        Vec::new()
    }
}
