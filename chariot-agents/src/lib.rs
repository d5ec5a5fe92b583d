//! Chariot agents
//!
//! BDI orchestration on top of the `chariot` language core:
//!
//! * [`runner::PlanRunner`] runs a plan once on an isolated clone of a runtime
//! * [`agent::Agent`] polls its plans on a tokio task and dispatches the
//!   eligible ones under a concurrency ceiling
//! * [`registry::AgentRegistry`] owns named agents and their belief stores
//! * [`builtins::register_agent_functions`] exposes all of the above to
//!   programs as ordinary callables

pub mod agent;
pub mod beliefs;
pub mod builtins;
pub mod config;
pub mod events;
pub mod registry;
pub mod runner;

pub use agent::{Agent, AgentInfo};
pub use beliefs::BeliefStore;
pub use builtins::register_agent_functions;
pub use config::AgentConfig;
pub use events::{AgentEvent, EventKind, EventSink, EventStatus};
pub use registry::AgentRegistry;
pub use runner::{PlanRunner, RunMode};
