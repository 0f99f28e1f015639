//! [`LlmPlanner`] – deliberative planner backed by an OpenAI-compatible model.
//!
//! Talks to any server exposing `/v1/chat/completions` (for example
//! [Ollama](https://ollama.com) at `http://localhost:11434`). The reply is
//! constrained with a JSON Schema derived from [`PlanDraft`] and validated
//! against the capability table before it becomes a [`Plan`].
//!
//! # Example
//!
//! ```rust,no_run
//! use arbiter_runtime::planners::LlmPlanner;
//! use arbiter_types::config::LlmConfig;
//!
//! let planner = LlmPlanner::from_config(&LlmConfig::default(), vec!["flee".into(), "wait".into()]);
//! // Requests need a running model server and go through the router.
//! ```

use std::time::Duration;

use arbiter_types::config::LlmConfig;
use arbiter_types::{Action, Plan, TaskSignature};
use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::router::{Planner, PlannerError, PlannerTier, PlanningTask};

/// Rules appended to every system message.
pub const PLANNING_GUIDELINES: &str = "\
## Planning rules
- Only use capabilities from the provided list.
- Prefer the shortest plan that satisfies the goal.
- Never plan actions against other players.
- Reply with a single JSON object matching the schema, nothing else.";

// ────────────────────────────────────────────────────────────────────────────
// Error type
// ────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    #[error("Plan uses unknown capability '{0}'")]
    UnknownCapability(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// What the model is asked to return.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanDraft {
    pub steps: Vec<Action>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: serde_json::Value,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

// ────────────────────────────────────────────────────────────────────────────
// LlmPlanner
// ────────────────────────────────────────────────────────────────────────────

pub struct LlmPlanner {
    base_url: String,
    model: String,
    client: reqwest::Client,
    expected_latency: Duration,
    capabilities: Vec<String>,
}

impl LlmPlanner {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
            expected_latency: Duration::from_millis(LlmConfig::default().expected_latency_ms),
            capabilities,
        }
    }

    pub fn from_config(config: &LlmConfig, capabilities: Vec<String>) -> Self {
        Self::new(&config.base_url, &config.model, capabilities)
            .with_expected_latency(Duration::from_millis(config.expected_latency_ms))
    }

    pub fn with_expected_latency(mut self, latency: Duration) -> Self {
        self.expected_latency = latency;
        self
    }

    /// System and user messages describing `task`.
    pub fn prompt(&self, task: &PlanningTask) -> Vec<ChatMessage> {
        let facts = serde_json::to_string(task.world.facts()).unwrap_or_default();
        let hint = task
            .template
            .as_ref()
            .map(|t| t.plan_hint.iter().map(|a| a.capability.as_str()).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        vec![
            ChatMessage {
                role: Role::System,
                content: format!(
                    "You plan actions for an autonomous agent.\nAvailable capabilities: {}\n\n{}",
                    self.capabilities.join(", "),
                    PLANNING_GUIDELINES
                ),
            },
            ChatMessage {
                role: Role::User,
                content: format!(
                    "Goal: {} (need {}, tier {:?})\nWorld facts: {facts}\nSuggested steps: {hint}",
                    task.candidate.key(),
                    task.candidate.need,
                    task.candidate.tier,
                ),
            },
        ]
    }

    /// Send `messages` and return the assistant's reply text.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let schema = serde_json::to_value(schema_for!(PlanDraft)).unwrap_or(serde_json::Value::Null);
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            response_format: ResponseFormat { kind: "json_schema", json_schema: schema },
        };

        let response: ChatResponse = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))
    }

    /// Parse a reply into a draft and reject capabilities outside the table.
    pub fn parse_reply(&self, reply: &str) -> Result<PlanDraft, LlmError> {
        let draft: PlanDraft =
            serde_json::from_str(reply.trim()).map_err(|e| LlmError::BadResponse(e.to_string()))?;
        if let Some(unknown) = draft.steps.iter().find(|s| !self.capabilities.contains(&s.capability)) {
            return Err(LlmError::UnknownCapability(unknown.capability.clone()));
        }
        Ok(draft)
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    fn name(&self) -> &str {
        "llm"
    }

    fn tier(&self) -> PlannerTier {
        PlannerTier::Deliberative
    }

    fn can_handle(&self, _signature: &TaskSignature) -> bool {
        !self.capabilities.is_empty()
    }

    fn estimate_processing_time(&self, _task: &PlanningTask) -> Duration {
        self.expected_latency
    }

    async fn process(&self, task: PlanningTask, cancel: CancellationToken) -> Result<Plan, PlannerError> {
        let messages = self.prompt(&task);
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PlannerError::Cancelled),
            reply = self.complete(&messages) => reply?,
        };
        debug!(goal = %task.candidate.key(), bytes = reply.len(), "model replied");
        let draft = self.parse_reply(&reply)?;
        Ok(Plan {
            goal_id: task.candidate.id,
            steps: draft.steps,
            confidence: draft.confidence.clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_types::{Bindings, GoalCandidate, NeedKind, PriorityTier, WorldState};

    fn planner() -> LlmPlanner {
        LlmPlanner::new("http://127.0.0.1:9", "test", vec!["flee".into(), "hide".into()])
    }

    fn task() -> PlanningTask {
        PlanningTask::new(
            GoalCandidate::new("flee", NeedKind::Safety, PriorityTier::SafetyReflex, Bindings::new()),
            None,
            WorldState::new().with("hidden", 0.0),
        )
    }

    #[test]
    fn chat_message_serializes_role() {
        let msg = ChatMessage { role: Role::System, content: "hello".into() };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"system\""));
    }

    #[test]
    fn prompt_lists_capabilities_and_guidelines() {
        let messages = planner().prompt(&task());
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("flee, hide"));
        assert!(messages[0].content.contains(PLANNING_GUIDELINES));
        assert!(messages[1].content.contains("Goal: flee"));
        assert!(messages[1].content.contains("\"hidden\":0.0"));
    }

    #[test]
    fn reply_with_known_capabilities_parses() {
        let reply = r#"{"steps":[{"name":"run","capability":"flee","params":{"speed":1.0}}],"confidence":0.7}"#;
        let draft = planner().parse_reply(reply).unwrap();
        assert_eq!(draft.steps[0].capability, "flee");
        assert_eq!(draft.steps[0].params["speed"], 1.0);
        assert_eq!(draft.confidence, 0.7);
    }

    #[test]
    fn reply_with_unknown_capability_is_rejected() {
        let reply = r#"{"steps":[{"name":"hit","capability":"attack_player"}]}"#;
        let err = planner().parse_reply(reply).unwrap_err();
        assert!(matches!(err, LlmError::UnknownCapability(c) if c == "attack_player"));
        assert!(matches!(planner().parse_reply("not json"), Err(LlmError::BadResponse(_))));
    }

    #[test]
    fn draft_schema_describes_steps() {
        let schema = serde_json::to_value(schema_for!(PlanDraft)).unwrap();
        assert!(schema["properties"]["steps"].is_object());
    }

    #[tokio::test]
    async fn cancelled_token_wins_over_the_request() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = planner().process(task(), cancel).await.unwrap_err();
        assert!(matches!(err, PlannerError::Cancelled));
    }
}
