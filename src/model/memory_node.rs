//! Causal Memory Layer data types (spec §3, §4.6).
//!
//! Nodes and edges are plain owned values referencing each other only by
//! `id`; the graph itself lives in an arena (see [`crate::cml`]) so there
//! are never any Rust-level cycles (Design Notes item 6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Event,
    Decision,
    Observation,
    Outcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNode {
    pub id: String,
    pub node_type: NodeType,
    pub timestamp: f64,
    pub content: String,
    pub source: String,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub causes: Vec<String>,
    #[serde(default)]
    pub effects: Vec<String>,
    #[serde(default)]
    pub regret_level: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalEdge {
    pub id: String,
    pub from_node: String,
    pub to_node: String,
    pub confidence: f64,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub context: HashMap<String, Value>,
}
