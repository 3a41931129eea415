//! Data model shared by every subsystem (spec §3).
//!
//! Kept as plain owned structs in an arena-friendly shape — no cyclic
//! references, no inheritance — per the Design Notes' "cyclic references
//! between CML nodes" and "dynamically dispatched tools" guidance.

pub mod envelope;
pub mod intent;
pub mod memory_node;
pub mod mutation;

pub use envelope::{RiskLevel, ToolInvocationEnvelope, ToolResult, ToolStats};
pub use intent::{Intent, IntentKind, IntentStatus};
pub use memory_node::{CausalEdge, MemoryNode, NodeType};
pub use mutation::{MutationAttempt, MutationPatch, RiskClassification};
