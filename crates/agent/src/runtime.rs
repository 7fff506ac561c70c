use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use parley_core::config::AgentConfig;
use parley_core::domain::approval::{Interruption, InterruptionResolution, RunSnapshot};
use parley_core::domain::conversation::{ContextMessage, ConversationId, Sentiment};

use crate::guardrails::{ToolDecision, ToolGuardrails, SEND_REPLY};
use crate::llm::{build_llm_client, ChatPrompt, LlmClient, LlmError};
use crate::prompt::{first_turn_prompt, follow_up_prompt, parse_model_output, ToolOutcomeLine};
use crate::tools::{AcknowledgeTool, ToolRegistry};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentProfile {
    pub agent_name: String,
    pub human_review: bool,
    pub reviewers: Vec<String>,
}

impl AgentProfile {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            agent_name: config.agent_name.clone(),
            human_review: config.human_review,
            reviewers: config.reviewers.clone(),
        }
    }

    /// An empty reviewer list admits any actor.
    pub fn may_review(&self, actor_id: &str) -> bool {
        self.reviewers.is_empty() || self.reviewers.iter().any(|reviewer| reviewer == actor_id)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AgentInput {
    pub conversation_id: ConversationId,
    pub message: String,
    pub history: Vec<ContextMessage>,
    pub sentiment: Sentiment,
    pub urgency: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// `output` is `None` when nothing should be sent.
    Completed { output: Option<String> },
    Interrupted { snapshot: RunSnapshot, interruptions: Vec<Interruption>, draft: Option<String> },
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("tool `{tool}` failed: {message}")]
    Tool { tool: String, message: String },
    #[error("run snapshot is invalid: {0}")]
    InvalidSnapshot(String),
    #[error("interruption {0} has no resolution")]
    UnresolvedInterruption(usize),
}

impl RuntimeError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Llm(error) => error.is_retryable(),
            Self::Tool { .. } => true,
            Self::InvalidSnapshot(_) | Self::UnresolvedInterruption(_) => false,
        }
    }
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run(&self, input: &AgentInput) -> Result<RunOutcome, RuntimeError>;

    /// Applies human decisions to a suspended snapshot and performs the approved
    /// side effects. The returned snapshot records their outcomes and has nothing
    /// left to decide; settling it again performs nothing. `resolutions` must
    /// cover every interruption the snapshot was suspended on.
    async fn settle(
        &self,
        snapshot: &RunSnapshot,
        resolutions: &[InterruptionResolution],
    ) -> Result<RunSnapshot, RuntimeError>;

    /// Continues a settled snapshot to its next outcome.
    async fn resume(&self, snapshot: &RunSnapshot) -> Result<RunOutcome, RuntimeError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RunStage {
    Tools,
    Reply,
    /// Reviewed tools ran; the follow-up reply is still to be drafted.
    ToolsSettled,
    ReplySettled,
}

impl RunStage {
    fn is_settled(self) -> bool {
        matches!(self, Self::ToolsSettled | Self::ReplySettled)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SnapshotState {
    version: u32,
    conversation_id: ConversationId,
    agent_name: String,
    prompt: ChatPrompt,
    draft: String,
    stage: RunStage,
    pending: Vec<Interruption>,
    #[serde(default)]
    tool_outcomes: Vec<ToolOutcomeLine>,
    /// Set once a reply stage settles; `None` when the reply was rejected.
    #[serde(default)]
    settled_reply: Option<String>,
}

impl SnapshotState {
    fn encode(&self) -> Result<RunSnapshot, RuntimeError> {
        serde_json::to_string(self)
            .map(RunSnapshot)
            .map_err(|error| RuntimeError::InvalidSnapshot(error.to_string()))
    }

    fn decode(snapshot: &RunSnapshot) -> Result<Self, RuntimeError> {
        let state: Self = serde_json::from_str(&snapshot.0)
            .map_err(|error| RuntimeError::InvalidSnapshot(error.to_string()))?;
        if state.version != SNAPSHOT_VERSION {
            return Err(RuntimeError::InvalidSnapshot(format!(
                "unsupported snapshot version {}",
                state.version
            )));
        }
        Ok(state)
    }
}

/// Drafts replies with an LLM and routes side effects through human review.
///
/// A turn first suspends on any approval-required tools the model asked for. Once
/// those are decided, the approved ones run and a follow-up reply is drafted. With
/// human review on, that reply is itself proposed as a `send_reply` interruption.
pub struct ReviewedReplyRuntime {
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    guardrails: ToolGuardrails,
    profile: AgentProfile,
}

impl ReviewedReplyRuntime {
    pub fn new(llm: Arc<dyn LlmClient>, tools: ToolRegistry, profile: AgentProfile) -> Self {
        let guardrails = ToolGuardrails::new(profile.human_review);
        Self { llm, tools, guardrails, profile }
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn interrupt(&self, state: SnapshotState) -> Result<RunOutcome, RuntimeError> {
        let interruptions = state.pending.clone();
        let draft = Some(state.draft.clone()).filter(|draft| !draft.trim().is_empty());
        Ok(RunOutcome::Interrupted { snapshot: state.encode()?, interruptions, draft })
    }

    fn finish_reply(&self, mut state: SnapshotState, reply: String) -> Result<RunOutcome, RuntimeError> {
        if reply.trim().is_empty() {
            warn!(
                event_name = "agent.reply.empty",
                conversation_id = state.conversation_id.0,
                "agent produced no reply text"
            );
            return Ok(RunOutcome::Completed { output: None });
        }
        if !self.guardrails.human_review {
            return Ok(RunOutcome::Completed { output: Some(reply) });
        }

        state.stage = RunStage::Reply;
        state.settled_reply = None;
        state.pending = vec![Interruption {
            tool_name: SEND_REPLY.to_owned(),
            arguments: json!({ "content": reply }),
            agent_name: state.agent_name.clone(),
        }];
        state.draft = reply;
        self.interrupt(state)
    }

    async fn execute_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolOutcomeLine, RuntimeError> {
        let output = self.tools.execute(tool_name, arguments).await.map_err(|error| {
            RuntimeError::Tool { tool: tool_name.to_owned(), message: error.to_string() }
        })?;
        debug!(tool = tool_name, "tool executed");
        Ok(ToolOutcomeLine { tool_name: tool_name.to_owned(), summary: output.to_string() })
    }
}

#[async_trait]
impl AgentRuntime for ReviewedReplyRuntime {
    async fn run(&self, input: &AgentInput) -> Result<RunOutcome, RuntimeError> {
        let prompt = first_turn_prompt(
            &self.profile.agent_name,
            &input.message,
            &input.history,
            input.sentiment,
            input.urgency,
        );
        let completion = self.llm.complete(&prompt).await?;
        let output = parse_model_output(&completion);

        let mut state = SnapshotState {
            version: SNAPSHOT_VERSION,
            conversation_id: input.conversation_id,
            agent_name: self.profile.agent_name.clone(),
            prompt,
            draft: output.reply,
            stage: RunStage::Tools,
            pending: Vec::new(),
            tool_outcomes: Vec::new(),
            settled_reply: None,
        };

        for action in output.actions {
            match self.guardrails.evaluate(&action.tool_name) {
                ToolDecision::Deny { reason_code, tool_name } => warn!(
                    event_name = "agent.tool.denied",
                    conversation_id = input.conversation_id.0,
                    tool = %tool_name,
                    reason_code,
                    "dropping tool request"
                ),
                _ if action.tool_name == SEND_REPLY => {
                    if let Some(content) = action.arguments.get("content").and_then(Value::as_str) {
                        state.draft = content.to_owned();
                    }
                }
                _ if !self.tools.contains(&action.tool_name) => warn!(
                    event_name = "agent.tool.unregistered",
                    conversation_id = input.conversation_id.0,
                    tool = %action.tool_name,
                    "dropping request for a tool with no implementation"
                ),
                ToolDecision::Allow => {
                    let outcome = self.execute_tool(&action.tool_name, action.arguments).await?;
                    state.tool_outcomes.push(outcome);
                }
                ToolDecision::RequireApproval => state.pending.push(Interruption {
                    tool_name: action.tool_name,
                    arguments: action.arguments,
                    agent_name: self.profile.agent_name.clone(),
                }),
            }
        }

        if !state.pending.is_empty() {
            info!(
                event_name = "agent.run.interrupted",
                conversation_id = input.conversation_id.0,
                pending = state.pending.len(),
                "agent requested reviewed tools"
            );
            return self.interrupt(state);
        }

        let reply = if state.tool_outcomes.is_empty() {
            state.draft.clone()
        } else {
            let follow_up = follow_up_prompt(&state.prompt, &state.tool_outcomes);
            parse_model_output(&self.llm.complete(&follow_up).await?).reply
        };
        self.finish_reply(state, reply)
    }

    async fn settle(
        &self,
        snapshot: &RunSnapshot,
        resolutions: &[InterruptionResolution],
    ) -> Result<RunSnapshot, RuntimeError> {
        let mut state = SnapshotState::decode(snapshot)?;
        if state.stage.is_settled() {
            debug!(conversation_id = state.conversation_id.0, "snapshot already settled");
            return Ok(snapshot.clone());
        }

        let pending = std::mem::take(&mut state.pending);
        let mut decided = Vec::with_capacity(pending.len());
        for (index, interruption) in pending.into_iter().enumerate() {
            let resolution = resolutions
                .iter()
                .find(|resolution| resolution.index == index)
                .ok_or(RuntimeError::UnresolvedInterruption(index))?;
            decided.push((interruption, resolution));
        }

        if state.stage == RunStage::Reply {
            state.settled_reply = decided
                .into_iter()
                .find(|(interruption, _)| interruption.tool_name == SEND_REPLY)
                .and_then(|(interruption, resolution)| {
                    resolution.is_approved().then(|| {
                        resolution.edited_content.clone().unwrap_or_else(|| {
                            interruption.arguments["content"].as_str().unwrap_or_default().to_owned()
                        })
                    })
                });
            state.stage = RunStage::ReplySettled;
            return state.encode();
        }

        for (interruption, resolution) in decided {
            if !resolution.is_approved() {
                let summary = match &resolution.rejection_reason {
                    Some(reason) => format!("rejected by reviewer: {reason}"),
                    None => "rejected by reviewer".to_owned(),
                };
                state.tool_outcomes.push(ToolOutcomeLine { tool_name: interruption.tool_name, summary });
                continue;
            }

            let arguments = reviewed_arguments(resolution, interruption.arguments);
            // Settling never fails once a tool has run.
            let outcome = match self.execute_tool(&interruption.tool_name, arguments).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(
                        event_name = "agent.tool.failed",
                        conversation_id = state.conversation_id.0,
                        tool = %interruption.tool_name,
                        error = %error,
                        "approved tool failed"
                    );
                    ToolOutcomeLine { tool_name: interruption.tool_name, summary: format!("failed: {error}") }
                }
            };
            state.tool_outcomes.push(outcome);
        }
        state.stage = RunStage::ToolsSettled;
        state.encode()
    }

    async fn resume(&self, snapshot: &RunSnapshot) -> Result<RunOutcome, RuntimeError> {
        let state = SnapshotState::decode(snapshot)?;
        match state.stage {
            RunStage::ReplySettled => Ok(RunOutcome::Completed { output: state.settled_reply }),
            RunStage::ToolsSettled => {
                let follow_up = follow_up_prompt(&state.prompt, &state.tool_outcomes);
                let reply = parse_model_output(&self.llm.complete(&follow_up).await?).reply;
                self.finish_reply(state, reply)
            }
            RunStage::Tools | RunStage::Reply => Err(RuntimeError::InvalidSnapshot(
                "snapshot still has undecided interruptions".to_owned(),
            )),
        }
    }
}

/// Edited content on an approved tool call replaces its arguments when it is a JSON object.
fn reviewed_arguments(resolution: &InterruptionResolution, original: Value) -> Value {
    resolution
        .edited_content
        .as_deref()
        .and_then(|edited| serde_json::from_str::<Value>(edited).ok())
        .filter(Value::is_object)
        .unwrap_or(original)
}

pub fn default_tool_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    for name in ["issue_refund", "cancel_order", "update_order", "lookup_order", "lookup_customer"]
    {
        registry.register(AcknowledgeTool::new(name));
    }
    registry
}

pub fn build_runtime(config: &AgentConfig) -> Result<Arc<dyn AgentRuntime>, LlmError> {
    let llm = build_llm_client(config)?;
    Ok(Arc::new(ReviewedReplyRuntime::new(
        llm,
        default_tool_registry(),
        AgentProfile::from_config(config),
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{json, Value};

    use parley_core::domain::approval::{DecisionAction, InterruptionResolution, RunSnapshot};
    use parley_core::domain::conversation::{ConversationId, Sentiment};

    use super::{
        default_tool_registry, AgentInput, AgentProfile, AgentRuntime, ReviewedReplyRuntime,
        RunOutcome, RuntimeError,
    };
    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::tools::Tool;

    struct CountingRefundTool {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Tool for CountingRefundTool {
        fn name(&self) -> &'static str {
            "issue_refund"
        }

        async fn execute(&self, input: Value) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("payments service unavailable");
            }
            Ok(json!({ "refunded": input["amount"] }))
        }
    }

    fn counting_runtime(
        responses: &[&str],
        fail: bool,
    ) -> (ReviewedReplyRuntime, ScriptedLlmClient, Arc<AtomicUsize>) {
        let llm = ScriptedLlmClient::new(responses.iter().map(|text| text.to_string()));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut tools = default_tool_registry();
        tools.register(CountingRefundTool { calls: calls.clone(), fail });
        let runtime = ReviewedReplyRuntime::new(Arc::new(llm.clone()), tools, profile(true));
        (runtime, llm, calls)
    }

    async fn decide(
        runtime: &ReviewedReplyRuntime,
        snapshot: &RunSnapshot,
        resolutions: &[InterruptionResolution],
    ) -> Result<RunOutcome, RuntimeError> {
        let settled = runtime.settle(snapshot, resolutions).await?;
        runtime.resume(&settled).await
    }

    fn profile(human_review: bool) -> AgentProfile {
        AgentProfile {
            agent_name: "support-agent".to_owned(),
            human_review,
            reviewers: Vec::new(),
        }
    }

    fn runtime(responses: &[&str], human_review: bool) -> (ReviewedReplyRuntime, ScriptedLlmClient) {
        let llm = ScriptedLlmClient::new(responses.iter().map(|text| text.to_string()));
        let runtime =
            ReviewedReplyRuntime::new(Arc::new(llm.clone()), default_tool_registry(), profile(human_review));
        (runtime, llm)
    }

    fn input(message: &str) -> AgentInput {
        AgentInput {
            conversation_id: ConversationId(42),
            message: message.to_owned(),
            history: Vec::new(),
            sentiment: Sentiment::Neutral,
            urgency: 0.2,
        }
    }

    fn resolve(index: usize, tool: &str, action: DecisionAction, edited: Option<&str>) -> InterruptionResolution {
        InterruptionResolution {
            index,
            tool_name: tool.to_owned(),
            action,
            edited_content: edited.map(str::to_owned),
            rejection_reason: None,
            actor_id: "agent-7".to_owned(),
            resolved_at: Utc::now(),
        }
    }

    fn interrupted(outcome: RunOutcome) -> (RunSnapshot, Vec<String>, Option<String>) {
        match outcome {
            RunOutcome::Interrupted { snapshot, interruptions, draft } => (
                snapshot,
                interruptions.into_iter().map(|interruption| interruption.tool_name).collect(),
                draft,
            ),
            completed => panic!("expected interruption, got {completed:?}"),
        }
    }

    #[tokio::test]
    async fn reviewed_reply_suspends_on_send_reply() {
        let (runtime, _) = runtime(&["Your order ships tomorrow."], true);

        let (snapshot, tools, draft) = interrupted(runtime.run(&input("Where is my order?")).await.unwrap());
        assert_eq!(tools, vec!["send_reply"]);
        assert_eq!(draft.as_deref(), Some("Your order ships tomorrow."));

        let approved = decide(
            &runtime,
            &snapshot,
            &[resolve(0, "send_reply", DecisionAction::Approve, Some("It ships Monday."))],
        )
        .await
        .unwrap();
        assert_eq!(approved, RunOutcome::Completed { output: Some("It ships Monday.".to_owned()) });

        let rejected = decide(&runtime, &snapshot, &[resolve(0, "send_reply", DecisionAction::Reject, None)])
            .await
            .unwrap();
        assert_eq!(rejected, RunOutcome::Completed { output: None });
    }

    #[tokio::test]
    async fn without_human_review_replies_complete_directly() {
        let (runtime, _) = runtime(&["Happy to help!"], false);
        let outcome = runtime.run(&input("thanks")).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed { output: Some("Happy to help!".to_owned()) });
    }

    #[tokio::test]
    async fn approved_tools_run_then_reply_is_reviewed_again() {
        let (runtime, llm) = runtime(
            &[
                "Let me sort that out.\nACTION: issue_refund {\"order_id\": \"A-17\", \"amount\": 20}",
                "Your refund of $20 is on its way.",
            ],
            true,
        );

        let (snapshot, tools, _) = interrupted(runtime.run(&input("Refund my order")).await.unwrap());
        assert_eq!(tools, vec!["issue_refund"]);

        let outcome = decide(&runtime, &snapshot, &[resolve(0, "issue_refund", DecisionAction::Approve, None)])
            .await
            .unwrap();
        let (_, tools, draft) = interrupted(outcome);
        assert_eq!(tools, vec!["send_reply"]);
        assert_eq!(draft.as_deref(), Some("Your refund of $20 is on its way."));

        let follow_up = llm.prompts().pop().expect("follow-up prompt");
        assert!(follow_up.user.contains("issue_refund:"));
        assert!(follow_up.user.contains("\"order_id\":\"A-17\""));
    }

    #[tokio::test]
    async fn rejected_tools_are_reported_to_the_follow_up() {
        let (runtime, llm) = runtime(
            &["ACTION: cancel_order {\"order_id\": \"A-9\"}", "We kept your order active."],
            false,
        );

        let (snapshot, _, draft) = interrupted(runtime.run(&input("cancel it")).await.unwrap());
        assert_eq!(draft, None);

        let mut rejection = resolve(0, "cancel_order", DecisionAction::Reject, None);
        rejection.rejection_reason = Some("already shipped".to_owned());
        let outcome = decide(&runtime, &snapshot, &[rejection]).await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed { output: Some("We kept your order active.".to_owned()) });
        let follow_up = llm.prompts().pop().expect("follow-up prompt");
        assert!(follow_up.user.contains("cancel_order: rejected by reviewer: already shipped"));
    }

    #[tokio::test]
    async fn lookups_run_without_review_and_unknown_tools_are_dropped() {
        let (runtime, llm) = runtime(
            &[
                "ACTION: lookup_order {\"order_id\": \"A-3\"}\nACTION: delete_account {}",
                "Order A-3 is out for delivery.",
            ],
            true,
        );

        let (_, tools, draft) = interrupted(runtime.run(&input("status of A-3?")).await.unwrap());
        assert_eq!(tools, vec!["send_reply"]);
        assert_eq!(draft.as_deref(), Some("Order A-3 is out for delivery."));
        assert_eq!(llm.prompts().len(), 2);
    }

    #[tokio::test]
    async fn resume_requires_every_interruption_resolved() {
        let (runtime, _) = runtime(
            &["ACTION: issue_refund {\"order_id\": \"A-1\"}\nACTION: update_order {\"order_id\": \"A-1\"}"],
            true,
        );
        let (snapshot, tools, _) = interrupted(runtime.run(&input("refund and fix address")).await.unwrap());
        assert_eq!(tools, vec!["issue_refund", "update_order"]);

        let error = runtime
            .settle(&snapshot, &[resolve(0, "issue_refund", DecisionAction::Approve, None)])
            .await
            .unwrap_err();
        assert!(matches!(error, RuntimeError::UnresolvedInterruption(1)));
        assert!(!error.is_retryable());

        let unsettled = runtime.resume(&snapshot).await.unwrap_err();
        assert!(matches!(unsettled, RuntimeError::InvalidSnapshot(_)));
    }

    #[tokio::test]
    async fn settled_tools_never_run_twice() {
        let (runtime, llm, calls) = counting_runtime(
            &["ACTION: issue_refund {\"order_id\": \"A-17\", \"amount\": 20}"],
            false,
        );
        let (snapshot, _, _) = interrupted(runtime.run(&input("Refund my order")).await.unwrap());
        llm.push_error(LlmError::Transport("connection reset".to_owned()));
        let approve = [resolve(0, "issue_refund", DecisionAction::Approve, None)];

        let settled = runtime.settle(&snapshot, &approve).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let error = runtime.resume(&settled).await.unwrap_err();
        assert!(error.is_retryable());

        let again = runtime.settle(&settled, &approve).await.unwrap();
        assert_eq!(again, settled);
        let (_, tools, draft) = interrupted(runtime.resume(&again).await.unwrap());
        assert_eq!(tools, vec!["send_reply"]);
        assert!(draft.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let follow_up = llm.prompts().pop().expect("follow-up prompt");
        assert!(follow_up.user.contains("issue_refund: {\"refunded\":20}"));
    }

    #[tokio::test]
    async fn failed_tools_are_reported_instead_of_aborting_the_settle() {
        let (runtime, llm, calls) = counting_runtime(
            &["ACTION: issue_refund {\"order_id\": \"A-17\", \"amount\": 20}", "We hit a snag with the refund."],
            true,
        );
        let (snapshot, _, _) = interrupted(runtime.run(&input("Refund my order")).await.unwrap());

        let settled = runtime
            .settle(&snapshot, &[resolve(0, "issue_refund", DecisionAction::Approve, None)])
            .await
            .unwrap();
        runtime.resume(&settled).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let follow_up = llm.prompts().pop().expect("follow-up prompt");
        assert!(follow_up.user.contains("issue_refund: failed: tool `issue_refund` failed: payments service unavailable"));
    }

    #[tokio::test]
    async fn llm_failures_are_retryable_and_bad_snapshots_are_not() {
        let (runtime, llm) = runtime(&[], true);
        llm.push_error(LlmError::Status { status: 503, body: "overloaded".to_owned() });

        let error = runtime.run(&input("hello")).await.unwrap_err();
        assert!(error.is_retryable());

        let error = runtime.settle(&RunSnapshot("{not json".to_owned()), &[]).await.unwrap_err();
        assert!(matches!(error, RuntimeError::InvalidSnapshot(_)));
        assert!(!error.is_retryable());
    }

    #[test]
    fn reviewer_allow_list_is_optional() {
        let mut profile = profile(true);
        assert!(profile.may_review("anyone"));
        profile.reviewers = vec!["lead-1".to_owned()];
        assert!(profile.may_review("lead-1"));
        assert!(!profile.may_review("agent-7"));
    }
}
