use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use sleuth_core::agent::Agent;
use sleuth_core::errors::AgentError;
use sleuth_core::events::{
    Emitter, ErrorData, Event, EventType, ReportGeneratedData, StepCompletedData, StepFindingsData, StepStartedData,
};
use sleuth_core::ids::SessionId;
use sleuth_core::json::{extract_json, truncate_str};
use sleuth_core::messages::Message;
use sleuth_core::plan::{NormalOutput, Plan, PlanState, RunResult, Step};

use crate::call;
use crate::error::{Phase, StepError};
use crate::prompts::{render, EXECUTOR_PROMPT, FINAL_PROMPT};

const NO_OPERATIONS_YET: &str = "(No operations performed yet - you are the first executor)";
const NO_FINDINGS_YET: &str = "(No research findings yet - you are the first executor)";
const NO_OPERATIONS_RECORDED: &str = "(No operations recorded)";
const NO_FINDINGS_ACCUMULATED: &str = "(No research findings accumulated)";
const NO_TABLE_SCHEMA: &str = "(Table schema not available - run `pcapchu-scripts meta` if needed)";

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Transitions allowed per plan step.
    pub steps_per_plan_step: usize,
    pub iteration_slack: usize,
    pub findings_preview_chars: usize,
    pub report_preview_chars: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            steps_per_plan_step: 5,
            iteration_slack: 10,
            findings_preview_chars: 2000,
            report_preview_chars: 5000,
        }
    }
}

impl ExecutorConfig {
    fn transition_limit(&self, total_steps: usize) -> usize {
        self.steps_per_plan_step.saturating_mul(total_steps).saturating_add(self.iteration_slack)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExecState {
    LoopCheck,
    NormalStep,
    FinalStep,
    Done,
}

pub struct ExecParams<'a> {
    pub plan: &'a Plan,
    pub user_query: &'a str,
    pub pcap_path: &'a str,
    pub session_id: Option<&'a SessionId>,
    pub cancel: &'a CancellationToken,
}

/// Walks a plan one step at a time. Every step but the last is a normal step
/// answering with `{findings, my_actions}`; the last step is consumed by the
/// final synthesis call, whose raw reply is the report.
pub struct Executor {
    agent: Arc<dyn Agent>,
    emitter: Arc<dyn Emitter>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(agent: Arc<dyn Agent>, emitter: Arc<dyn Emitter>, config: ExecutorConfig) -> Self {
        Self { agent, emitter, config }
    }

    #[instrument(skip_all, fields(phase = "executor", session_id = ?p.session_id, steps = p.plan.steps.len()))]
    pub async fn run(&self, p: ExecParams<'_>) -> Result<RunResult, StepError> {
        let result = self.drive(&p).await;
        if let Err(e) = &result {
            self.report_failure(&p, e);
        }
        result
    }

    async fn drive(&self, p: &ExecParams<'_>) -> Result<RunResult, StepError> {
        let started = Instant::now();
        let mut state = PlanState::new(p.plan.clone());
        let total = state.total_steps();
        if total == 0 {
            return Err(StepError::EmptyPlan);
        }

        let limit = self.config.transition_limit(total);
        let mut transitions = 0usize;
        let mut exec = ExecState::LoopCheck;

        while exec != ExecState::Done {
            transitions += 1;
            if transitions > limit {
                return Err(StepError::IterationLimit { limit });
            }

            exec = match exec {
                ExecState::LoopCheck => match state.remaining() {
                    1 => ExecState::FinalStep,
                    r if r <= 0 => {
                        return Err(StepError::IndexOutOfRange {
                            index: state.current_step_index,
                            len: total,
                        })
                    }
                    _ => ExecState::NormalStep,
                },
                ExecState::NormalStep => {
                    self.normal_step(&mut state, p).await?;
                    ExecState::LoopCheck
                }
                ExecState::FinalStep => {
                    self.final_step(&mut state, p, started).await?;
                    ExecState::Done
                }
                ExecState::Done => ExecState::Done,
            };
        }

        debug!(transitions, limit, "executor finished");
        Ok(state.into_result())
    }

    async fn normal_step(&self, state: &mut PlanState, p: &ExecParams<'_>) -> Result<(), StepError> {
        let step = current_step(state)?;
        let step_id = step.step_id;
        self.step_started(&step, state.total_steps(), p);

        let operation_log = or_placeholder(state.joined_operation_log(), NO_OPERATIONS_YET);
        let findings = or_placeholder(state.research_findings.clone(), NO_FINDINGS_YET);
        let table_schema = or_placeholder(state.table_schema.clone(), NO_TABLE_SCHEMA);
        let overview = state.plan.overview();
        let current = format!("Step {}: {}", step_id, step.intent);

        let prompt = render(
            EXECUTOR_PROMPT,
            &[
                ("user_query", p.user_query),
                ("pcap_path", p.pcap_path),
                ("plan_overview", &overview),
                ("research_findings", &findings),
                ("operation_log", &operation_log),
                ("current_step", &current),
                ("table_schema", &table_schema),
            ],
        );
        let messages = vec![
            Message::system(prompt),
            Message::user(format!("Carry out {current} and reply with the JSON object.")),
        ];

        let reply = self.invoke(&messages, step_id, Phase::Executor, p.cancel).await?;
        let json = extract_json(&reply.content).map_err(|_| StepError::Extract { step_id })?;
        let output: NormalOutput =
            serde_json::from_str(json).map_err(|source| StepError::Decode { step_id, source })?;

        let findings = output.findings.into_string();
        let actions = output.my_actions.into_string();
        state.record_step(&step, &findings, &actions);
        info!(step_id, findings_len = findings.len(), actions_len = actions.len(), "step completed");

        let preview = self.config.findings_preview_chars;
        self.emit(
            EventType::StepFindings,
            p,
            StepFindingsData {
                step_id,
                intent: step.intent.clone(),
                findings: truncate_str(&findings, preview),
                actions: truncate_str(&actions, preview),
            },
        );
        self.emit(
            EventType::StepCompleted,
            p,
            StepCompletedData {
                step_id,
                intent: step.intent,
            },
        );
        Ok(())
    }

    async fn final_step(&self, state: &mut PlanState, p: &ExecParams<'_>, started: Instant) -> Result<(), StepError> {
        let step = current_step(state)?;
        let total = state.total_steps();
        self.step_started(&step, total, p);

        let operation_log = or_placeholder(state.joined_operation_log(), NO_OPERATIONS_RECORDED);
        let findings = or_placeholder(state.research_findings.clone(), NO_FINDINGS_ACCUMULATED);
        let table_schema = or_placeholder(state.table_schema.clone(), NO_TABLE_SCHEMA);
        let overview = state.plan.overview();

        let prompt = render(
            FINAL_PROMPT,
            &[
                ("user_query", p.user_query),
                ("pcap_path", p.pcap_path),
                ("plan_overview", &overview),
                ("research_findings", &findings),
                ("operation_log", &operation_log),
                ("table_schema", &table_schema),
            ],
        );
        let messages = vec![
            Message::system(prompt),
            Message::user("Write the final report."),
        ];

        let reply = self.invoke(&messages, step.step_id, Phase::Final, p.cancel).await?;
        state.end_output = reply.content;
        state.current_step_index += 1;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(step_id = step.step_id, report_len = state.end_output.len(), duration_ms, "report generated");
        self.emit(
            EventType::ReportGenerated,
            p,
            ReportGeneratedData {
                report: truncate_str(&state.end_output, self.config.report_preview_chars),
                content_length: state.end_output.len(),
                total_steps: total,
                duration_ms,
            },
        );
        Ok(())
    }

    async fn invoke(
        &self,
        messages: &[Message],
        step_id: i64,
        phase: Phase,
        cancel: &CancellationToken,
    ) -> Result<Message, StepError> {
        call::generate(self.agent.as_ref(), messages, cancel)
            .await
            .map_err(|e| match e {
                AgentError::Cancelled => StepError::Cancelled { step_id },
                source => StepError::Agent { step_id, phase, source },
            })
    }

    fn step_started(&self, step: &Step, total_steps: usize, p: &ExecParams<'_>) {
        debug!(step_id = step.step_id, intent = %step.intent, "step started");
        self.emit(
            EventType::StepStarted,
            p,
            StepStartedData {
                step_id: step.step_id,
                intent: step.intent.clone(),
                total_steps,
            },
        );
    }

    fn report_failure(&self, p: &ExecParams<'_>, err: &StepError) {
        let phase = match err {
            StepError::Agent { phase, .. } => *phase,
            _ => Phase::Executor,
        };
        let data = ErrorData {
            phase: phase.to_string(),
            message: err.to_string(),
            step_id: err.step_id(),
        };

        if matches!(err, StepError::Cancelled { .. }) {
            info!(error = %err, "execution cancelled");
        } else {
            warn!(error = %err, %phase, step_id = ?err.step_id(), "execution failed");
            if err.step_id().is_some() {
                self.emit(EventType::StepError, p, data.clone());
            }
        }
        self.emit(EventType::Error, p, data);
    }

    fn emit(&self, ty: EventType, p: &ExecParams<'_>, data: impl serde::Serialize) {
        self.emitter.emit(Event::new(ty, p.session_id, data));
    }
}

fn current_step(state: &PlanState) -> Result<Step, StepError> {
    state.current_step().cloned().ok_or(StepError::IndexOutOfRange {
        index: state.current_step_index,
        len: state.total_steps(),
    })
}

fn or_placeholder(value: String, placeholder: &str) -> String {
    if value.is_empty() {
        placeholder.to_string()
    } else {
        value
    }
}
