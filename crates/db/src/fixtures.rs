use flowchat_core::domain::graph::{
    handles, AiNodeConfig, BotId, ConditionOperator, EdgeId, FlowEdge, FlowGraph, FlowNode, NodeId,
    NodeKind,
};

/// Deterministic onboarding flow used by the seed command and tests: greet
/// the visitor, capture their name when unknown, then branch into booking,
/// AI Q&A, or a human handoff.
pub fn demo_graph(bot_id: &BotId) -> FlowGraph {
    let node = |id: &str, kind: NodeKind| FlowNode {
        id: NodeId(id.to_string()),
        bot_id: bot_id.clone(),
        kind,
    };
    let edge = |id: &str, source: &str, target: &str, handle: Option<&str>| FlowEdge {
        id: EdgeId(id.to_string()),
        source: NodeId(source.to_string()),
        target: NodeId(target.to_string()),
        handle: handle.map(str::to_string),
    };

    let nodes = vec![
        node("start", NodeKind::Start),
        node(
            "ask-known",
            NodeKind::Condition {
                variable: "user_name".to_string(),
                operator: ConditionOperator::Exists,
            },
        ),
        node(
            "ask-name",
            NodeKind::Input {
                prompt: "Welcome! What's your name?".to_string(),
                variable: "user_name".to_string(),
            },
        ),
        node("greet", NodeKind::Message { text: "Hi {{user_name}}, great to see you!".to_string() }),
        node(
            "menu",
            NodeKind::Choice {
                prompt: "How can we help you today?".to_string(),
                options: vec![
                    "Book a demo".to_string(),
                    "Ask a question".to_string(),
                    "Talk to an agent".to_string(),
                ],
            },
        ),
        node("book", NodeKind::Scheduler),
        node(
            "booked",
            NodeKind::Message { text: "You're booked, {{user_name}}! See you soon.".to_string() },
        ),
        node(
            "not-booked",
            NodeKind::Message { text: "No problem, we can book another time.".to_string() },
        ),
        node("qa", NodeKind::Ai { config: AiNodeConfig::default() }),
        node("human", NodeKind::LiveAgent),
    ];

    let edges = vec![
        edge("e01", "start", "ask-known", None),
        edge("e02", "ask-known", "greet", Some(handles::YES)),
        edge("e03", "ask-known", "ask-name", Some(handles::NO)),
        edge("e04", "ask-name", "greet", None),
        edge("e05", "greet", "menu", None),
        edge("e06", "menu", "book", Some("Book a demo")),
        edge("e07", "menu", "qa", Some("Ask a question")),
        edge("e08", "menu", "human", Some("Talk to an agent")),
        edge("e09", "menu", "qa", Some(handles::DEFAULT)),
        edge("e10", "book", "booked", Some(handles::ON_CONFIRM)),
        edge("e11", "book", "not-booked", Some(handles::ON_CANCEL)),
        edge("e12", "qa", "menu", Some(handles::ON_RESPONSE)),
    ];

    match FlowGraph::new(bot_id.clone(), nodes, edges) {
        Ok(graph) => graph,
        // The fixture is static and validated by tests; an invalid fixture is
        // a programming error.
        Err(error) => unreachable!("demo graph must be structurally valid: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use flowchat_core::domain::graph::{handles, BotId, NodeId};

    use super::demo_graph;

    #[test]
    fn demo_graph_is_valid_and_fully_wired() {
        let graph = demo_graph(&BotId("bot-demo".to_string()));

        assert_eq!(graph.start_node().map(|node| node.id.0.as_str()), Some("start"));
        assert_eq!(graph.nodes().count(), 10);

        let booking = graph
            .edge_from(&NodeId("menu".to_string()), Some("Book a demo"))
            .expect("booking edge exists");
        assert_eq!(booking.target.0, "book");

        let fallback = graph
            .edge_from(&NodeId("menu".to_string()), Some(handles::DEFAULT))
            .expect("default edge exists");
        assert_eq!(fallback.target.0, "qa");
    }
}
