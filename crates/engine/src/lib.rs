pub mod delivery;
pub mod executor;
pub mod handoff;
pub mod inbound;
pub mod sweeper;

use thiserror::Error;

use flowchat_db::repositories::RepositoryError;

pub use delivery::{
    ClientAction, DeliveryChannel, DeliveryError, NoopDelivery, ObserverEvent, OutboundEvent,
    RecordingDelivery,
};
pub use executor::{FlowExecutor, WalkOutcome};
pub use handoff::{HandoffError, HandoffService};
pub use inbound::{InboundMessage, InboundRouter, OpenSession};
pub use sweeper::{SweepReport, Sweeper};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
