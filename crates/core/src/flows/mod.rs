pub mod engine;
pub mod states;

pub use engine::{AgentRunFlow, FlowDefinition, FlowEngine, RunFlowError};
pub use states::{RunAction, RunEvent, RunState, RunTransition};
