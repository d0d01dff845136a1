use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Edge handles with fixed meaning during traversal. Choice nodes additionally
/// use the option text itself as the handle.
pub mod handles {
    pub const YES: &str = "yes";
    pub const NO: &str = "no";
    pub const DEFAULT: &str = "default";
    pub const ON_RESPONSE: &str = "onResponse";
    pub const ON_CONFIRM: &str = "onConfirm";
    pub const ON_CANCEL: &str = "onCancel";
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BotId(pub String);

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiNodeConfig {
    #[serde(default)]
    pub disable_knowledge_base: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Exists,
    NotExists,
}

/// One step in a conversation graph. The payload shape is fixed per kind so
/// traversal dispatch is an exhaustive match, never a stringly-typed switch
/// that can silently fall through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Start,
    Message { text: String },
    Choice { prompt: String, options: Vec<String> },
    Input { prompt: String, variable: String },
    Condition { variable: String, operator: ConditionOperator },
    Ai { config: AiNodeConfig },
    Scheduler,
    LiveAgent,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MessageData {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChoiceData {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    options: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InputData {
    #[serde(default)]
    prompt: String,
    variable: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConditionData {
    variable: String,
    operator: ConditionOperator,
}

impl NodeKind {
    pub fn type_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Message { .. } => "message",
            Self::Choice { .. } => "choice",
            Self::Input { .. } => "input",
            Self::Condition { .. } => "condition",
            Self::Ai { .. } => "ai",
            Self::Scheduler => "scheduler",
            Self::LiveAgent => "live-agent",
        }
    }

    /// Type-specific payload as stored in the `data_json` column.
    pub fn data_json(&self) -> serde_json::Value {
        match self {
            Self::Start | Self::Scheduler | Self::LiveAgent => json!({}),
            Self::Message { text } => json!({ "text": text }),
            Self::Choice { prompt, options } => json!({ "prompt": prompt, "options": options }),
            Self::Input { prompt, variable } => json!({ "prompt": prompt, "variable": variable }),
            Self::Condition { variable, operator } => {
                json!({ "variable": variable, "operator": operator })
            }
            Self::Ai { config } => serde_json::to_value(config).unwrap_or_else(|_| json!({})),
        }
    }

    pub fn from_parts(node_type: &str, data: &serde_json::Value) -> Result<Self, GraphError> {
        let invalid = |source: serde_json::Error| GraphError::InvalidNodeData {
            node_type: node_type.to_string(),
            detail: source.to_string(),
        };

        match node_type {
            "start" => Ok(Self::Start),
            "scheduler" => Ok(Self::Scheduler),
            "live-agent" => Ok(Self::LiveAgent),
            "message" => {
                let payload: MessageData =
                    serde_json::from_value(data.clone()).map_err(invalid)?;
                Ok(Self::Message { text: payload.text })
            }
            "choice" => {
                let payload: ChoiceData = serde_json::from_value(data.clone()).map_err(invalid)?;
                Ok(Self::Choice { prompt: payload.prompt, options: payload.options })
            }
            "input" => {
                let payload: InputData = serde_json::from_value(data.clone()).map_err(invalid)?;
                Ok(Self::Input { prompt: payload.prompt, variable: payload.variable })
            }
            "condition" => {
                let payload: ConditionData =
                    serde_json::from_value(data.clone()).map_err(invalid)?;
                Ok(Self::Condition { variable: payload.variable, operator: payload.operator })
            }
            "ai" => {
                let config: AiNodeConfig = serde_json::from_value(data.clone()).map_err(invalid)?;
                Ok(Self::Ai { config })
            }
            other => Err(GraphError::UnknownNodeType { node_type: other.to_string() }),
        }
    }

}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowNode {
    pub id: NodeId,
    pub bot_id: BotId,
    pub kind: NodeKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub handle: Option<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("bot `{bot_id}` has no start node")]
    MissingStartNode { bot_id: String },
    #[error("bot `{bot_id}` has {count} start nodes, expected exactly one")]
    MultipleStartNodes { bot_id: String, count: usize },
    #[error("duplicate edge for source `{source_node}` and handle `{handle}`")]
    DuplicateEdgeHandle { source_node: String, handle: String },
    #[error("edge `{edge}` references missing node `{node}`")]
    DanglingEdge { edge: String, node: String },
    #[error("unknown node type `{node_type}`")]
    UnknownNodeType { node_type: String },
    #[error("invalid payload for `{node_type}` node: {detail}")]
    InvalidNodeData { node_type: String, detail: String },
}

/// The per-bot conversation graph. Construction validates the structural
/// invariants the builder must uphold: exactly one start node, no duplicate
/// `(source, handle)` pairs, no edges into or out of missing nodes. A graph
/// that fails validation is rejected at save time rather than producing
/// ambiguous traversal later.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowGraph {
    bot_id: BotId,
    nodes: BTreeMap<NodeId, FlowNode>,
    edges: Vec<FlowEdge>,
}

impl FlowGraph {
    pub fn new(
        bot_id: BotId,
        nodes: Vec<FlowNode>,
        mut edges: Vec<FlowEdge>,
    ) -> Result<Self, GraphError> {
        let node_map: BTreeMap<NodeId, FlowNode> =
            nodes.into_iter().map(|node| (node.id.clone(), node)).collect();

        let start_count = node_map
            .values()
            .filter(|node| matches!(node.kind, NodeKind::Start))
            .count();
        if start_count == 0 {
            return Err(GraphError::MissingStartNode { bot_id: bot_id.0.clone() });
        }
        if start_count > 1 {
            return Err(GraphError::MultipleStartNodes { bot_id: bot_id.0.clone(), count: start_count });
        }

        // Deterministic traversal order regardless of datastore return order.
        edges.sort_by(|a, b| a.id.cmp(&b.id));

        let mut seen_handles = BTreeMap::new();
        for edge in &edges {
            if !node_map.contains_key(&edge.source) {
                return Err(GraphError::DanglingEdge {
                    edge: edge.id.0.clone(),
                    node: edge.source.0.clone(),
                });
            }
            if !node_map.contains_key(&edge.target) {
                return Err(GraphError::DanglingEdge {
                    edge: edge.id.0.clone(),
                    node: edge.target.0.clone(),
                });
            }
            let key = (edge.source.clone(), edge.handle.clone());
            if seen_handles.insert(key, edge.id.clone()).is_some() {
                return Err(GraphError::DuplicateEdgeHandle {
                    source_node: edge.source.0.clone(),
                    handle: edge.handle.clone().unwrap_or_default(),
                });
            }
        }

        Ok(Self { bot_id, nodes: node_map, edges })
    }

    pub fn bot_id(&self) -> &BotId {
        &self.bot_id
    }

    pub fn node(&self, id: &NodeId) -> Option<&FlowNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[FlowEdge] {
        &self.edges
    }

    pub fn start_node(&self) -> Option<&FlowNode> {
        self.nodes.values().find(|node| matches!(node.kind, NodeKind::Start))
    }

    /// Edge whose `(source, handle)` pair matches exactly. Uniqueness is a
    /// construction invariant, so at most one edge can match.
    pub fn edge_from(&self, source: &NodeId, handle: Option<&str>) -> Option<&FlowEdge> {
        self.edges
            .iter()
            .find(|edge| &edge.source == source && edge.handle.as_deref() == handle)
    }

    /// The single outgoing edge regardless of handle, in edge-id order. Used
    /// by node kinds that advance unconditionally.
    pub fn first_edge_from(&self, source: &NodeId) -> Option<&FlowEdge> {
        self.edges.iter().find(|edge| &edge.source == source)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        handles, AiNodeConfig, BotId, ConditionOperator, EdgeId, FlowEdge, FlowGraph, FlowNode,
        GraphError, NodeId, NodeKind,
    };

    fn node(id: &str, kind: NodeKind) -> FlowNode {
        FlowNode { id: NodeId(id.to_string()), bot_id: BotId("bot-1".to_string()), kind }
    }

    fn edge(id: &str, source: &str, target: &str, handle: Option<&str>) -> FlowEdge {
        FlowEdge {
            id: EdgeId(id.to_string()),
            source: NodeId(source.to_string()),
            target: NodeId(target.to_string()),
            handle: handle.map(str::to_string),
        }
    }

    fn graph(nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) -> Result<FlowGraph, GraphError> {
        FlowGraph::new(BotId("bot-1".to_string()), nodes, edges)
    }

    #[test]
    fn builds_graph_and_resolves_edges_by_handle() {
        let graph = graph(
            vec![
                node("start", NodeKind::Start),
                node("cond", NodeKind::Condition {
                    variable: "user_name".to_string(),
                    operator: ConditionOperator::Exists,
                }),
                node("greet", NodeKind::Message { text: "Hi {{user_name}}".to_string() }),
                node("ask", NodeKind::Input {
                    prompt: "What's your name?".to_string(),
                    variable: "user_name".to_string(),
                }),
            ],
            vec![
                edge("e1", "start", "cond", None),
                edge("e2", "cond", "greet", Some(handles::YES)),
                edge("e3", "cond", "ask", Some(handles::NO)),
            ],
        )
        .expect("valid graph");

        let yes = graph.edge_from(&NodeId("cond".to_string()), Some(handles::YES));
        assert_eq!(yes.map(|edge| edge.target.0.as_str()), Some("greet"));

        let any = graph.first_edge_from(&NodeId("cond".to_string()));
        assert_eq!(any.map(|edge| edge.id.0.as_str()), Some("e2"));

        assert_eq!(graph.start_node().map(|node| node.id.0.as_str()), Some("start"));
    }

    #[test]
    fn rejects_duplicate_source_handle_pairs() {
        let error = graph(
            vec![
                node("start", NodeKind::Start),
                node("a", NodeKind::Message { text: "a".to_string() }),
                node("b", NodeKind::Message { text: "b".to_string() }),
            ],
            vec![
                edge("e1", "start", "a", Some("pick")),
                edge("e2", "start", "b", Some("pick")),
            ],
        )
        .expect_err("duplicate handles must be rejected");

        assert_eq!(
            error,
            GraphError::DuplicateEdgeHandle { source_node: "start".to_string(), handle: "pick".to_string() }
        );
    }

    #[test]
    fn rejects_dangling_edge_targets() {
        let error = graph(
            vec![node("start", NodeKind::Start)],
            vec![edge("e1", "start", "missing", None)],
        )
        .expect_err("dangling target must be rejected");

        assert!(matches!(error, GraphError::DanglingEdge { ref node, .. } if node == "missing"));
    }

    #[test]
    fn requires_exactly_one_start_node() {
        let missing = graph(vec![node("a", NodeKind::Scheduler)], Vec::new())
            .expect_err("graph without start must be rejected");
        assert!(matches!(missing, GraphError::MissingStartNode { .. }));

        let doubled = graph(
            vec![node("s1", NodeKind::Start), node("s2", NodeKind::Start)],
            Vec::new(),
        )
        .expect_err("two start nodes must be rejected");
        assert!(matches!(doubled, GraphError::MultipleStartNodes { count: 2, .. }));
    }

    #[test]
    fn node_kind_round_trips_through_type_and_data_columns() {
        let kinds = vec![
            NodeKind::Start,
            NodeKind::Message { text: "hello".to_string() },
            NodeKind::Choice {
                prompt: "Pick one".to_string(),
                options: vec!["A".to_string(), "B".to_string()],
            },
            NodeKind::Input { prompt: "Name?".to_string(), variable: "user_name".to_string() },
            NodeKind::Condition {
                variable: "email".to_string(),
                operator: ConditionOperator::NotExists,
            },
            NodeKind::Ai {
                config: AiNodeConfig { disable_knowledge_base: true, instructions: None },
            },
            NodeKind::Scheduler,
            NodeKind::LiveAgent,
        ];

        for kind in kinds {
            let decoded = NodeKind::from_parts(kind.type_str(), &kind.data_json())
                .expect("decode persisted node kind");
            assert_eq!(decoded, kind);
        }
    }

    #[test]
    fn unknown_node_type_is_a_decode_error_not_a_noop() {
        let error = NodeKind::from_parts("videoNode", &serde_json::json!({}))
            .expect_err("unknown node type must fail decoding");
        assert!(matches!(error, GraphError::UnknownNodeType { ref node_type } if node_type == "videoNode"));
    }

    #[test]
    fn ai_node_config_accepts_camel_case_payload() {
        let kind = NodeKind::from_parts(
            "ai",
            &serde_json::json!({ "disableKnowledgeBase": true, "instructions": "be brief" }),
        )
        .expect("decode ai payload");

        assert_eq!(
            kind,
            NodeKind::Ai {
                config: AiNodeConfig {
                    disable_knowledge_base: true,
                    instructions: Some("be brief".to_string()),
                }
            }
        );
    }
}
