use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::ids::SessionId;
use crate::plan::Step;

/// Per-subscriber buffer used when none is configured.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Lifecycle events published while a round runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "plan.created")]
    PlanCreated,
    #[serde(rename = "plan.error")]
    PlanError,
    #[serde(rename = "step.started")]
    StepStarted,
    #[serde(rename = "step.findings")]
    StepFindings,
    #[serde(rename = "step.completed")]
    StepCompleted,
    #[serde(rename = "step.error")]
    StepError,
    #[serde(rename = "report.generated")]
    ReportGenerated,
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "error")]
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanCreated => "plan.created",
            Self::PlanError => "plan.error",
            Self::StepStarted => "step.started",
            Self::StepFindings => "step.findings",
            Self::StepCompleted => "step.completed",
            Self::StepError => "step.error",
            Self::ReportGenerated => "report.generated",
            Self::Info => "info",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan.created" => Ok(Self::PlanCreated),
            "plan.error" => Ok(Self::PlanError),
            "step.started" => Ok(Self::StepStarted),
            "step.findings" => Ok(Self::StepFindings),
            "step.completed" => Ok(Self::StepCompleted),
            "step.error" => Ok(Self::StepError),
            "report.generated" => Ok(Self::ReportGenerated),
            "info" => Ok(Self::Info),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, session_id: Option<&SessionId>, data: impl Serialize) -> Self {
        Self {
            event_type,
            session_id: session_id.cloned(),
            timestamp: Utc::now(),
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Decode the payload into one of the typed data structs.
    pub fn data_as<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        serde_json::from_value(self.data.clone()).ok()
    }
}

// --- Payloads ---

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    pub step_id: i64,
    pub intent: String,
}

impl From<&Step> for StepInfo {
    fn from(step: &Step) -> Self {
        Self {
            step_id: step.step_id,
            intent: step.intent.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanCreatedData {
    pub thought: String,
    pub total_steps: usize,
    pub steps: Vec<StepInfo>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepStartedData {
    pub step_id: i64,
    pub intent: String,
    pub total_steps: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepFindingsData {
    pub step_id: i64,
    pub intent: String,
    pub findings: String,
    pub actions: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepCompletedData {
    pub step_id: i64,
    pub intent: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportGeneratedData {
    pub report: String,
    pub content_length: usize,
    pub total_steps: usize,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorData {
    pub phase: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InfoData {
    pub message: String,
}

/// Fan-out publisher of lifecycle events. Publishing never blocks.
pub trait Emitter: Send + Sync {
    fn emit(&self, event: Event);

    /// Register a new subscriber with its own bounded buffer.
    fn subscribe(&self) -> mpsc::Receiver<Event>;

    /// Close every subscriber channel. Later emits are silently ignored.
    fn close(&self);
}

struct Subscribers {
    senders: Vec<mpsc::Sender<Event>>,
    closed: bool,
}

/// Emitter backed by one bounded mpsc channel per subscriber. A full
/// subscriber loses the event; other subscribers are unaffected.
pub struct ChannelEmitter {
    buffer: usize,
    inner: Mutex<Subscribers>,
}

impl ChannelEmitter {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            inner: Mutex::new(Subscribers {
                senders: Vec::new(),
                closed: false,
            }),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().senders.len()
    }
}

impl Default for ChannelEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl Emitter for ChannelEmitter {
    fn emit(&self, event: Event) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!(event_type = %event.event_type, "subscriber full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    fn subscribe(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.senders.push(tx);
        }
        rx
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.senders.clear();
    }
}

/// Emitter that discards everything.
pub struct NopEmitter;

impl Emitter for NopEmitter {
    fn emit(&self, _event: Event) {}

    fn subscribe(&self) -> mpsc::Receiver<Event> {
        mpsc::channel(1).1
    }

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(msg: &str) -> Event {
        Event::new(EventType::Info, None, InfoData { message: msg.into() })
    }

    #[test]
    fn event_type_strings() {
        for ty in [
            EventType::PlanCreated,
            EventType::StepFindings,
            EventType::ReportGenerated,
            EventType::Error,
        ] {
            assert_eq!(ty.as_str().parse::<EventType>().unwrap(), ty);
            assert_eq!(serde_json::to_value(ty).unwrap(), ty.as_str());
        }
        assert!("step.bogus".parse::<EventType>().is_err());
    }

    #[test]
    fn event_wire_shape() {
        let sid = SessionId::from_raw("sess_1");
        let evt = Event::new(
            EventType::StepStarted,
            Some(&sid),
            StepStartedData { step_id: 2, intent: "dns".into(), total_steps: 3 },
        );
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "step.started");
        assert_eq!(json["session_id"], "sess_1");
        assert_eq!(json["data"]["total_steps"], 3);

        let anon = serde_json::to_value(info("x")).unwrap();
        assert!(anon.get("session_id").is_none());
    }

    #[test]
    fn error_data_omits_missing_step() {
        let json = serde_json::to_value(ErrorData {
            phase: "planner".into(),
            message: "boom".into(),
            step_id: None,
        })
        .unwrap();
        assert!(json.get("step_id").is_none());
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() {
        let emitter = ChannelEmitter::new(8);
        let mut a = emitter.subscribe();
        let mut b = emitter.subscribe();
        emitter.emit(info("one"));

        let got_a: InfoData = a.recv().await.unwrap().data_as().unwrap();
        let got_b: InfoData = b.recv().await.unwrap().data_as().unwrap();
        assert_eq!(got_a.message, "one");
        assert_eq!(got_b.message, "one");
    }

    #[tokio::test]
    async fn full_subscriber_drops_without_blocking() {
        let emitter = ChannelEmitter::new(2);
        let mut slow = emitter.subscribe();
        for i in 0..5 {
            emitter.emit(info(&i.to_string()));
        }
        let mut seen = Vec::new();
        while let Ok(evt) = slow.try_recv() {
            seen.push(evt.data_as::<InfoData>().unwrap().message);
        }
        assert_eq!(seen, vec!["0", "1"]);
        assert_eq!(emitter.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn close_ends_streams_and_silences_emit() {
        let emitter = ChannelEmitter::default();
        let mut rx = emitter.subscribe();
        emitter.close();
        emitter.emit(info("late"));
        assert!(rx.recv().await.is_none());

        let mut after = emitter.subscribe();
        assert!(after.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned() {
        let emitter = ChannelEmitter::new(4);
        let rx = emitter.subscribe();
        drop(rx);
        emitter.emit(info("x"));
        assert_eq!(emitter.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn nop_emitter_is_inert() {
        let emitter = NopEmitter;
        emitter.emit(info("ignored"));
        let mut rx = emitter.subscribe();
        assert!(rx.recv().await.is_none());
    }
}
