//! Agent side of the reply pipeline.
//!
//! The runtime drafts a reply with an LLM and never performs a side effect on
//! its own: every approval-required tool call, and with human review on every
//! reply, comes back as an interruption inside an opaque snapshot. The caller
//! persists the snapshot and later resumes it with human decisions.

pub mod guardrails;
pub mod llm;
pub mod prompt;
pub mod runtime;
pub mod tools;

pub use guardrails::{ToolDecision, ToolGuardrails, SEND_REPLY};
pub use llm::{build_llm_client, ChatPrompt, HttpLlmClient, LlmClient, LlmError, ScriptedLlmClient};
pub use runtime::{
    build_runtime, default_tool_registry, AgentInput, AgentProfile, AgentRuntime,
    ReviewedReplyRuntime, RunOutcome, RuntimeError,
};
pub use tools::{AcknowledgeTool, Tool, ToolRegistry};
