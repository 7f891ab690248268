//! Context management: system-prompt composition, token budgeting, and
//! compaction planning.
//!
//! The gateway owns the reconstructed message list; this crate decides
//! what surrounds it (ordered system parts with cache grouping), when the
//! context is too full (threshold zones), and how to shrink it (summarize
//! the older turns, keep the recent ones).

pub mod budget;
pub mod compaction;
pub mod compose;

pub use budget::{estimate_tokens, ContextBudget, ContextZone, TurnAdmission};
pub use compaction::{
    count_turns, preview, split_for_compaction, summarize, CompactionPreview,
};
pub use compose::{compose_system_parts, ContextInputs};
