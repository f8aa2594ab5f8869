//! Agents that converse, run code and call the model
//!
//! Reply order for every turn: termination/human check, registered handlers,
//! code execution, LLM, default auto reply.

mod config;
mod conversable;
mod reply;

pub use config::AgentConfig;
pub use conversable::ConversableAgent;
pub use reply::{HandlerOutcome, Reply, ReplyContext, ReplyHandler, StopReason};
