//! Shared domain types for the Switchboard agent server.
//!
//! Everything here is provider- and transport-agnostic: messages, stream
//! events, token records, tool shapes, the shared error type, and the
//! configuration tree. Higher crates (events, providers, context, tools,
//! gateway) depend on this one and never on each other's internals.

pub mod config;
pub mod error;
pub mod message;
pub mod stream;
pub mod todo;
pub mod tokens;
pub mod tool;
