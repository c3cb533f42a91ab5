use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use sleuth_core::agent::Agent;
use sleuth_core::errors::AgentError;
use sleuth_core::events::{Emitter, ErrorData, Event, EventType, PlanCreatedData, StepInfo};
use sleuth_core::ids::SessionId;
use sleuth_core::json::extract_json;
use sleuth_core::messages::Message;
use sleuth_core::plan::{Plan, SessionHistory};

use crate::call;
use crate::error::{Phase, PlanError};
use crate::prompts::{render, PLANNER_PROMPT};

pub struct PlanParams<'a> {
    pub user_query: &'a str,
    pub pcap_path: &'a str,
    pub history: Option<&'a SessionHistory>,
    pub session_id: Option<&'a SessionId>,
    pub cancel: &'a CancellationToken,
}

/// Turns a query, plus what earlier rounds learned, into a [`Plan`] with a
/// single agent call. Holds no state between runs.
pub struct Planner {
    agent: Arc<dyn Agent>,
    emitter: Arc<dyn Emitter>,
}

impl Planner {
    pub fn new(agent: Arc<dyn Agent>, emitter: Arc<dyn Emitter>) -> Self {
        Self { agent, emitter }
    }

    #[instrument(skip_all, fields(phase = "planner", session_id = ?p.session_id))]
    pub async fn run(&self, p: PlanParams<'_>) -> Result<Plan, PlanError> {
        let messages = build_messages(p.user_query, p.pcap_path, p.history);

        let plan = match self.plan_from(&messages, p.cancel).await {
            Ok(plan) => plan,
            Err(e) => {
                if !matches!(e, PlanError::Cancelled) {
                    warn!(error = %e, "planning failed");
                }
                self.emitter.emit(Event::new(
                    EventType::PlanError,
                    p.session_id,
                    ErrorData {
                        phase: Phase::Planner.to_string(),
                        message: e.to_string(),
                        step_id: None,
                    },
                ));
                return Err(e);
            }
        };

        info!(steps = plan.steps.len(), "plan created");
        self.emitter.emit(Event::new(
            EventType::PlanCreated,
            p.session_id,
            PlanCreatedData {
                thought: plan.thought.clone(),
                total_steps: plan.steps.len(),
                steps: plan.steps.iter().map(StepInfo::from).collect(),
            },
        ));
        Ok(plan)
    }

    async fn plan_from(&self, messages: &[Message], cancel: &CancellationToken) -> Result<Plan, PlanError> {
        let reply = call::generate(self.agent.as_ref(), messages, cancel)
            .await
            .map_err(|e| match e {
                AgentError::Cancelled => PlanError::Cancelled,
                other => PlanError::Agent(other),
            })?;
        let json = extract_json(&reply.content)?;
        Ok(serde_json::from_str(json)?)
    }
}

fn build_messages(user_query: &str, pcap_path: &str, history: Option<&SessionHistory>) -> Vec<Message> {
    let user_input = match history.map(history_section) {
        Some(section) if !section.is_empty() => {
            format!("{section}\n\n---\n\n**Current Query:**\n{user_query}")
        }
        _ => user_query.to_string(),
    };
    vec![
        Message::system(render(PLANNER_PROMPT, &[("pcap_path", pcap_path)])),
        Message::user(user_input),
    ]
}

/// Markdown block carrying earlier rounds into the planner prompt. Empty
/// when there is nothing to carry.
pub fn history_section(history: &SessionHistory) -> String {
    let mut parts = Vec::new();
    if !history.findings.is_empty() {
        parts.push(format!("## Previous Research Findings\n\n{}", history.findings));
    }
    if !history.operation_log.is_empty() {
        parts.push(format!("## Previous Operation Log\n\n{}", history.operation_log));
    }
    if !history.previous_report.is_empty() {
        parts.push(format!("## Most Recent Report\n\n{}", history.previous_report));
    }
    if parts.is_empty() {
        return String::new();
    }
    format!("# Context From Previous Rounds\n\n{}", parts.join("\n\n---\n\n"))
}
