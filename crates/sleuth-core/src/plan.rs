use std::fmt::Write as _;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

/// One unit of investigative intent. Ids are planner-assigned and may skip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: i64,
    pub intent: String,
}

impl Step {
    pub fn new(step_id: i64, intent: impl Into<String>) -> Self {
        Self {
            step_id,
            intent: intent.into(),
        }
    }
}

/// Planner output. Never mutated after the planner returns it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub thought: String,
    #[serde(default)]
    pub table_schema: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Plan {
    /// Markdown overview injected into every executor prompt.
    pub fn overview(&self) -> String {
        let mut out = String::from("## Investigation Plan\n\n");
        let _ = write!(out, "**Planner Thought**: {}\n\n", self.thought);
        for step in &self.steps {
            let _ = writeln!(out, "- **Step {}**: {}", step.step_id, step.intent);
        }
        out
    }
}

/// Mutable state for a single executor run.
#[derive(Clone, Debug)]
pub struct PlanState {
    pub plan: Plan,
    pub table_schema: String,
    pub current_step_index: usize,
    pub research_findings: String,
    pub operation_log: Vec<String>,
    pub step_outputs: Vec<StepOutput>,
    pub end_output: String,
}

impl PlanState {
    pub fn new(plan: Plan) -> Self {
        let table_schema = plan.table_schema.clone();
        Self {
            plan,
            table_schema,
            current_step_index: 0,
            research_findings: String::new(),
            operation_log: Vec::new(),
            step_outputs: Vec::new(),
            end_output: String::new(),
        }
    }

    pub fn total_steps(&self) -> usize {
        self.plan.steps.len()
    }

    /// Steps left including the current one. Negative once the index overruns.
    pub fn remaining(&self) -> isize {
        self.total_steps() as isize - self.current_step_index as isize
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.plan.steps.get(self.current_step_index)
    }

    /// Fold one step's output into the accumulated findings and log, then advance.
    pub fn record_step(&mut self, step: &Step, findings: &str, actions: &str) {
        if !findings.is_empty() {
            let _ = write!(
                self.research_findings,
                "\n\n### Step {}: {}\n{}",
                step.step_id, step.intent, findings
            );
        }
        if !actions.is_empty() {
            self.operation_log
                .push(format!("[Step {} - {}]\n{}", step.step_id, step.intent, actions));
        }
        self.step_outputs.push(StepOutput {
            step_id: step.step_id,
            findings: findings.to_string(),
            actions: actions.to_string(),
        });
        self.current_step_index += 1;
    }

    pub fn joined_operation_log(&self) -> String {
        self.operation_log.join("\n---\n")
    }

    pub fn into_result(self) -> RunResult {
        let operation_log = self.joined_operation_log();
        RunResult {
            report: self.end_output,
            findings: self.research_findings,
            operation_log,
            steps: self.step_outputs,
        }
    }
}

/// Raw output of one normal step, kept for the per-step ledger rows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutput {
    pub step_id: i64,
    pub findings: String,
    pub actions: String,
}

/// Terminal output of one executor run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub report: String,
    pub findings: String,
    pub operation_log: String,
    #[serde(default)]
    pub steps: Vec<StepOutput>,
}

/// Context folded from every prior round of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHistory {
    pub findings: String,
    pub operation_log: String,
    pub previous_report: String,
    pub all_reports: Vec<String>,
}

impl SessionHistory {
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty() && self.operation_log.is_empty() && self.previous_report.is_empty()
    }
}

/// A text field the model may send as a string, an array of strings, or
/// something else entirely. Anything unrecognised is kept as its raw JSON
/// text, byte for byte.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FlexString(pub String);

impl FlexString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    fn from_raw(raw: &RawValue) -> Self {
        let text = raw.get();
        if text == "null" {
            return Self(String::new());
        }
        if let Ok(s) = serde_json::from_str::<String>(text) {
            return Self(s);
        }
        if let Ok(parts) = serde_json::from_str::<Vec<String>>(text) {
            return Self(parts.join("\n"));
        }
        Self(text.to_string())
    }
}

impl<'de> Deserialize<'de> for FlexString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Ok(Self::from_raw(&raw))
    }
}

/// Structured reply expected from a normal executor step.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NormalOutput {
    #[serde(default)]
    pub findings: FlexString,
    #[serde(default)]
    pub my_actions: FlexString,
}
