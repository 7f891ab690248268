//! Durable append-only event log for Switchboard sessions.
//!
//! Every state transition a session goes through is an immutable [`Event`]
//! in a parent-linked chain. The store owns a SQLite database with tables
//! for workspaces, sessions, events, blobs, the FTS content index, and the
//! task backlog. Appends are linearized per session and CAS-guarded on the
//! session head; reads are plain queries.

mod backlog;
mod error;
mod event;
mod event_type;
mod payload;
mod reconstruct;
mod schema;
mod store;
mod tree;

pub use error::{StoreError, StoreResult};
pub use event::{new_event_id, Event, WireEvent};
pub use event_type::{EventType, ALL_EVENT_TYPES};
pub use payload::*;
pub use reconstruct::{reconstruct_messages, reconstruct_state, ReconstructedState};
pub use store::{
    EventStore, HistoryOptions, HistoryPage, SearchOptions, SearchResult, SessionFilter,
    SessionRecord, SincePage, WorkspaceRecord, BLOB_SPILL_BYTES,
};
pub use tree::{BranchInfo, SubtreeDirection, TreeNode};
