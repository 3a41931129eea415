//! Causal Memory Layer (CML): an append-only temporal-causal graph of the
//! agent's experience (spec §4.6).
//!
//! Nodes live in a flat arena keyed by id; edges reference endpoints by id
//! only, never by pointer, so export/import is a trivial structural copy
//! (Design Notes item 6). A single mutex around the arena gives the
//! atomicity §3 requires for `add_edge` (both endpoints' `causes`/`effects`
//! update in the same critical section as the edge insertion).

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::model::{CausalEdge, MemoryNode, NodeType};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CmlExport {
    pub version: u32,
    pub nodes: Vec<MemoryNode>,
    pub edges: Vec<CausalEdge>,
}

#[derive(Debug, Default)]
struct Arena {
    nodes: HashMap<String, MemoryNode>,
    order: Vec<String>,
    by_type: HashMap<NodeType, Vec<String>>,
    edges: Vec<CausalEdge>,
}

#[derive(Debug, Default, Clone)]
struct Session {
    decision_id: Option<String>,
    observation_ids: Vec<String>,
}

pub struct CausalMemory {
    arena: Mutex<Arena>,
    sessions: Mutex<HashMap<String, Session>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainLink {
    pub node: String,
    pub node_type: NodeType,
    pub content: String,
    pub depth: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhyExplanation {
    pub outcome: String,
    pub chain: Vec<ChainLink>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignificantChange {
    pub change_type: String,
    pub change: String,
    pub ratio: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhatChanged {
    pub period_start: f64,
    pub period_end: f64,
    pub new_decisions: Vec<(String, String)>,
    pub new_outcomes: Vec<(String, String)>,
    pub significant_changes: Vec<SignificantChange>,
}

impl CausalMemory {
    pub fn new() -> Self {
        Self {
            arena: Mutex::new(Arena::default()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_node(&self, node: MemoryNode) -> CoreResult<()> {
        let mut arena = self.arena.lock();
        if arena.nodes.contains_key(&node.id) {
            return Err(CoreError::Internal(format!("duplicate node id {}", node.id)));
        }
        arena.order.push(node.id.clone());
        arena.by_type.entry(node.node_type).or_default().push(node.id.clone());
        arena.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn add_edge(&self, edge: CausalEdge) -> CoreResult<()> {
        let mut arena = self.arena.lock();
        if !arena.nodes.contains_key(&edge.from_node) {
            return Err(CoreError::Internal(format!("edge endpoint missing: {}", edge.from_node)));
        }
        if !arena.nodes.contains_key(&edge.to_node) {
            return Err(CoreError::Internal(format!("edge endpoint missing: {}", edge.to_node)));
        }
        let (from, to) = (edge.from_node.clone(), edge.to_node.clone());
        arena.edges.push(edge);
        if let Some(from_node) = arena.nodes.get_mut(&from) {
            if !from_node.effects.contains(&to) {
                from_node.effects.push(to.clone());
            }
        }
        if let Some(to_node) = arena.nodes.get_mut(&to) {
            if !to_node.causes.contains(&from) {
                to_node.causes.push(from);
            }
        }
        Ok(())
    }

    pub fn get_node(&self, id: &str) -> Option<MemoryNode> {
        self.arena.lock().nodes.get(id).cloned()
    }

    pub fn find_before(&self, t: f64, node_type: Option<NodeType>) -> Vec<MemoryNode> {
        let arena = self.arena.lock();
        let mut result: Vec<MemoryNode> = arena
            .nodes
            .values()
            .filter(|n| n.timestamp < t && node_type.map(|ty| ty == n.node_type).unwrap_or(true))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.timestamp.partial_cmp(&a.timestamp).unwrap());
        result
    }

    pub fn find_after(&self, t: f64, node_type: Option<NodeType>) -> Vec<MemoryNode> {
        let arena = self.arena.lock();
        let mut result: Vec<MemoryNode> = arena
            .nodes
            .values()
            .filter(|n| n.timestamp > t && node_type.map(|ty| ty == n.node_type).unwrap_or(true))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap());
        result
    }

    pub fn find_causes_of(&self, id: &str) -> Vec<MemoryNode> {
        let arena = self.arena.lock();
        arena
            .nodes
            .get(id)
            .map(|n| n.causes.iter().filter_map(|c| arena.nodes.get(c).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn find_effects_of(&self, id: &str) -> Vec<MemoryNode> {
        let arena = self.arena.lock();
        arena
            .nodes
            .get(id)
            .map(|n| n.effects.iter().filter_map(|e| arena.nodes.get(e).cloned()).collect())
            .unwrap_or_default()
    }

    /// Breadth-first traversal over `causes` from `outcome_id`, returning an
    /// ordered chain and the geometric mean of node confidences along it.
    pub fn why(&self, outcome_id: &str) -> WhyExplanation {
        let arena = self.arena.lock();
        let mut chain = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut queue: std::collections::VecDeque<(String, u32)> = arena
            .nodes
            .get(outcome_id)
            .map(|n| n.causes.iter().map(|c| (c.clone(), 1u32)).collect())
            .unwrap_or_default();

        while let Some((node_id, depth)) = queue.pop_front() {
            if !visited.insert(node_id.clone()) {
                continue;
            }
            let Some(node) = arena.nodes.get(&node_id) else { continue };
            chain.push(ChainLink {
                node: node.id.clone(),
                node_type: node.node_type,
                content: node.content.clone(),
                depth,
            });
            for upstream in &node.causes {
                queue.push_back((upstream.clone(), depth + 1));
            }
        }

        let confidence = geometric_mean(chain.iter().filter_map(|link| arena.nodes.get(&link.node).map(|n| n.confidence)));

        WhyExplanation {
            outcome: outcome_id.to_string(),
            chain,
            confidence,
        }
    }

    /// Decisions/outcomes newly recorded between `t0` and `t1`, plus a
    /// heuristic significant-change detector (decision-frequency ratio).
    pub fn what_changed(&self, t0: f64, t1: f64) -> WhatChanged {
        let before = self.find_before(t0, None);
        let after = self.find_after(t1, None);

        let new_decisions: Vec<_> = after
            .iter()
            .filter(|n| n.node_type == NodeType::Decision)
            .map(|n| (n.id.clone(), n.content.clone()))
            .collect();
        let new_outcomes: Vec<_> = after
            .iter()
            .filter(|n| n.node_type == NodeType::Outcome)
            .map(|n| (n.id.clone(), n.content.clone()))
            .collect();

        WhatChanged {
            period_start: t0,
            period_end: t1,
            new_decisions,
            new_outcomes,
            significant_changes: detect_significant_changes(&before, &after),
        }
    }

    /// Begin a reasoning episode: appends a DECISION node and opens a
    /// session bracket for subsequent `record_tool_execution` calls.
    pub fn start_decision_session(&self, session_id: &str, description: &str, source: &str) -> CoreResult<String> {
        let decision = MemoryNode {
            id: format!("decision_{}", short_id()),
            node_type: NodeType::Decision,
            timestamp: now_secs(),
            content: description.to_string(),
            source: source.to_string(),
            confidence: 1.0,
            metadata: HashMap::new(),
            causes: Vec::new(),
            effects: Vec::new(),
            regret_level: None,
        };
        let decision_id = decision.id.clone();
        self.add_node(decision)?;
        self.sessions.lock().insert(
            session_id.to_string(),
            Session {
                decision_id: Some(decision_id.clone()),
                observation_ids: Vec::new(),
            },
        );
        Ok(decision_id)
    }

    /// Append an OBSERVATION recording one tool execution, tagged with the
    /// session's currently open DECISION for traceability. The association
    /// is recorded in the observation's metadata only, not as a `causes`
    /// CausalEdge: a DECISION is what prompted the observation, not an
    /// upstream cause an outcome's `why()` chain should explain, and
    /// modeling it as a causal edge would otherwise pull every session's
    /// DECISION node into `why()`'s BFS over `causes` one hop past the
    /// observations themselves.
    pub fn record_tool_execution(
        &self,
        session_id: &str,
        tool_name: &str,
        input: &Value,
        result_summary: &str,
        cost: f64,
        success: bool,
    ) -> CoreResult<String> {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(session_id.to_string()).or_default();
        let decision_id = session.decision_id.clone();

        let mut metadata = HashMap::from([
            ("input".to_string(), input.clone()),
            ("cost".to_string(), serde_json::json!(cost)),
            ("success".to_string(), serde_json::json!(success)),
        ]);
        if let Some(decision_id) = &decision_id {
            metadata.insert("decision_id".to_string(), serde_json::json!(decision_id));
        }

        let observation = MemoryNode {
            id: format!("observation_{}", short_id()),
            node_type: NodeType::Observation,
            timestamp: now_secs(),
            content: format!("{tool_name}: {result_summary}"),
            source: tool_name.to_string(),
            confidence: if success { 0.9 } else { 0.6 },
            metadata,
            causes: Vec::new(),
            effects: Vec::new(),
            regret_level: None,
        };
        let observation_id = observation.id.clone();
        session.observation_ids.push(observation_id.clone());
        drop(sessions);
        self.add_node(observation)?;
        Ok(observation_id)
    }

    /// Close a reasoning episode: appends an OUTCOME and wires a causal
    /// edge from every session OBSERVATION to it (Testable Property 4).
    pub fn record_outcome(
        &self,
        session_id: &str,
        description: &str,
        success: bool,
        regret_level: Option<f64>,
    ) -> CoreResult<String> {
        let outcome = MemoryNode {
            id: format!("outcome_{}", short_id()),
            node_type: NodeType::Outcome,
            timestamp: now_secs(),
            content: description.to_string(),
            source: session_id.to_string(),
            confidence: if success { 0.9 } else { 0.7 },
            metadata: HashMap::from([("success".to_string(), serde_json::json!(success))]),
            causes: Vec::new(),
            effects: Vec::new(),
            regret_level,
        };
        let outcome_id = outcome.id.clone();
        self.add_node(outcome)?;

        let observation_ids = {
            let sessions = self.sessions.lock();
            sessions.get(session_id).map(|s| s.observation_ids.clone()).unwrap_or_default()
        };
        for observation_id in observation_ids {
            self.add_edge(CausalEdge {
                id: format!("edge_{}", short_id()),
                from_node: observation_id,
                to_node: outcome_id.clone(),
                confidence: 0.8,
                latency_ms: None,
                context: HashMap::new(),
            })?;
        }
        self.sessions.lock().remove(session_id);
        Ok(outcome_id)
    }

    pub fn export(&self) -> CmlExport {
        let arena = self.arena.lock();
        CmlExport {
            version: 1,
            nodes: arena.order.iter().filter_map(|id| arena.nodes.get(id).cloned()).collect(),
            edges: arena.edges.clone(),
        }
    }

    /// Rebuild the arena from an exported graph. Lossless: ids, types,
    /// timestamps, contents, confidences, and edges are preserved exactly.
    pub fn import(export: CmlExport) -> Self {
        let cml = Self::new();
        {
            let mut arena = cml.arena.lock();
            for node in export.nodes {
                arena.order.push(node.id.clone());
                arena.by_type.entry(node.node_type).or_default().push(node.id.clone());
                arena.nodes.insert(node.id.clone(), node);
            }
            arena.edges = export.edges;
        }
        cml
    }
}

impl Default for CausalMemory {
    fn default() -> Self {
        Self::new()
    }
}

fn geometric_mean(values: impl Iterator<Item = f64>) -> f64 {
    let (product, count) = values.fold((1.0f64, 0u32), |(p, c), v| (p * v, c + 1));
    if count == 0 {
        0.0
    } else {
        product.powf(1.0 / count as f64)
    }
}

fn detect_significant_changes(before: &[MemoryNode], after: &[MemoryNode]) -> Vec<SignificantChange> {
    let before_decisions: Vec<_> = before.iter().filter(|n| n.node_type == NodeType::Decision).collect();
    let after_decisions: Vec<_> = after.iter().filter(|n| n.node_type == NodeType::Decision).collect();

    if before_decisions.is_empty() || after_decisions.is_empty() {
        return Vec::new();
    }

    let before_span = (before_decisions.first().unwrap().timestamp - before_decisions.last().unwrap().timestamp)
        .abs()
        .max(1.0);
    let after_span = (after_decisions.last().unwrap().timestamp - after_decisions.first().unwrap().timestamp)
        .abs()
        .max(1.0);

    let before_freq = before_decisions.len() as f64 / before_span;
    let after_freq = after_decisions.len() as f64 / after_span;

    let ratio = if before_freq > 0.0 { after_freq / before_freq } else { f64::INFINITY };
    if ratio > 2.0 || ratio < 0.5 {
        vec![SignificantChange {
            change_type: "decision_frequency".to_string(),
            change: if ratio > 1.0 { "increased".to_string() } else { "decreased".to_string() },
            ratio,
            description: format!(
                "decision making {} by {:.1}%",
                if ratio > 1.0 { "accelerated" } else { "slowed" },
                (ratio - 1.0).abs() * 100.0
            ),
        }]
    } else {
        Vec::new()
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, node_type: NodeType, ts: f64, confidence: f64) -> MemoryNode {
        MemoryNode {
            id: id.to_string(),
            node_type,
            timestamp: ts,
            content: id.to_string(),
            source: "test".to_string(),
            confidence,
            metadata: HashMap::new(),
            causes: Vec::new(),
            effects: Vec::new(),
            regret_level: None,
        }
    }

    #[test]
    fn add_edge_updates_both_endpoints() {
        let cml = CausalMemory::new();
        cml.add_node(node("a", NodeType::Observation, 1.0, 0.9)).unwrap();
        cml.add_node(node("b", NodeType::Outcome, 2.0, 0.9)).unwrap();
        cml.add_edge(CausalEdge {
            id: "e1".to_string(),
            from_node: "a".to_string(),
            to_node: "b".to_string(),
            confidence: 0.8,
            latency_ms: None,
            context: HashMap::new(),
        })
        .unwrap();
        assert!(cml.find_causes_of("b").iter().any(|n| n.id == "a"));
        assert!(cml.find_effects_of("a").iter().any(|n| n.id == "b"));
    }

    #[test]
    fn add_edge_rejects_missing_endpoint() {
        let cml = CausalMemory::new();
        cml.add_node(node("a", NodeType::Observation, 1.0, 0.9)).unwrap();
        let err = cml.add_edge(CausalEdge {
            id: "e1".to_string(),
            from_node: "a".to_string(),
            to_node: "ghost".to_string(),
            confidence: 0.8,
            latency_ms: None,
            context: HashMap::new(),
        });
        assert!(err.is_err());
    }

    #[test]
    fn session_outcome_links_every_observation() {
        let cml = CausalMemory::new();
        cml.start_decision_session("s1", "investigate pain", "autonomy").unwrap();
        cml.record_tool_execution("s1", "memory.retrieve", &serde_json::json!({}), "ok", 0.1, true)
            .unwrap();
        cml.record_tool_execution("s1", "memory.retrieve", &serde_json::json!({}), "ok", 0.1, true)
            .unwrap();
        let outcome_id = cml.record_outcome("s1", "done", false, Some(0.8)).unwrap();

        let causes = cml.find_causes_of(&outcome_id);
        assert_eq!(causes.len(), 2);
        assert!(causes.iter().all(|c| c.node_type == NodeType::Observation));
    }

    #[test]
    fn why_returns_geometric_mean_confidence() {
        let cml = CausalMemory::new();
        cml.start_decision_session("s1", "d", "autonomy").unwrap();
        cml.record_tool_execution("s1", "t1", &serde_json::json!({}), "ok", 0.1, true).unwrap();
        cml.record_tool_execution("s1", "t2", &serde_json::json!({}), "ok", 0.1, true).unwrap();
        let outcome_id = cml.record_outcome("s1", "x", false, None).unwrap();

        let explanation = cml.why(&outcome_id);
        assert_eq!(explanation.chain.len(), 2);
        assert!(explanation.chain.iter().all(|l| l.depth == 1));
        let expected = (0.9f64 * 0.9f64).sqrt();
        assert!((explanation.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn export_import_round_trip_is_lossless() {
        let cml = CausalMemory::new();
        cml.add_node(node("a", NodeType::Event, 1.0, 0.7)).unwrap();
        cml.add_node(node("b", NodeType::Decision, 2.0, 0.8)).unwrap();
        cml.add_edge(CausalEdge {
            id: "e1".to_string(),
            from_node: "a".to_string(),
            to_node: "b".to_string(),
            confidence: 0.5,
            latency_ms: Some(10),
            context: HashMap::new(),
        })
        .unwrap();

        let exported = cml.export();
        let restored = CausalMemory::import(exported.clone());
        let reexported = restored.export();

        assert_eq!(exported.nodes.len(), reexported.nodes.len());
        assert_eq!(exported.edges.len(), reexported.edges.len());
        for (a, b) in exported.nodes.iter().zip(reexported.nodes.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.node_type, b.node_type);
            assert_eq!(a.timestamp, b.timestamp);
            assert_eq!(a.content, b.content);
            assert_eq!(a.confidence, b.confidence);
        }
    }

    #[test]
    fn what_changed_flags_decision_frequency_spike() {
        let cml = CausalMemory::new();
        for i in 0..5 {
            cml.add_node(node(&format!("d{i}"), NodeType::Decision, 10.0 + i as f64, 0.9))
                .unwrap();
        }
        for i in 0..12 {
            cml.add_node(node(&format!("e{i}"), NodeType::Decision, 100.0 + i as f64, 0.9))
                .unwrap();
        }
        let changed = cml.what_changed(16.0, 99.0);
        assert!(!changed.significant_changes.is_empty());
        assert_eq!(changed.significant_changes[0].change, "increased");
    }
}
