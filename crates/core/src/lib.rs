pub mod config;
pub mod contact;
pub mod domain;
pub mod errors;
pub mod template;

pub use domain::graph::{
    AiNodeConfig, BotId, ConditionOperator, EdgeId, FlowEdge, FlowGraph, FlowNode, GraphError,
    NodeId, NodeKind,
};
pub use domain::message::{Message, MessageId, MessageRole};
pub use domain::session::{AgentId, CompanyId, ControlStatus, EscalationLevel, Session, SessionId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use template::render_template;
