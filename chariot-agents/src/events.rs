//! Plan and step lifecycle events
//!
//! Runs publish [`AgentEvent`]s to an [`EventSink`] so dashboards can follow
//! what agents are doing. Publishing never blocks a run: without
//! subscribers the event is discarded, and a subscriber that falls behind
//! loses the oldest events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Plan,
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Start,
    Finish,
    Drop,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub plan: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub time: DateTime<Utc>,
}

impl AgentEvent {
    pub fn plan(agent: Option<&str>, plan: &str, status: EventStatus) -> Self {
        Self {
            kind: EventKind::Plan,
            agent: agent.map(str::to_string),
            plan: plan.to_string(),
            step: None,
            status,
            error: None,
            time: Utc::now(),
        }
    }

    pub fn step(agent: Option<&str>, plan: &str, step: usize, status: EventStatus) -> Self {
        Self {
            kind: EventKind::Step,
            step: Some(step),
            ..Self::plan(agent, plan, status)
        }
    }

    pub fn at_step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Fan-out of agent events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<AgentEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: AgentEvent) {
        // No subscribers is not an error for the run that produced the event
        let _ = self.sender.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_silent() {
        let sink = EventSink::new(2);
        sink.emit(AgentEvent::plan(None, "p", EventStatus::Start));
    }

    #[test]
    fn step_events_serialize_with_wire_names() {
        let event = AgentEvent::step(Some("thermostat"), "cool", 1, EventStatus::Error)
            .with_error("boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step");
        assert_eq!(json["agent"], "thermostat");
        assert_eq!(json["step"], 1);
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn lagging_subscriber_keeps_newest_events() {
        let sink = EventSink::new(2);
        let mut rx = sink.subscribe();
        for step in 0..5 {
            sink.emit(AgentEvent::step(None, "p", step, EventStatus::Finish));
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
        assert_eq!(rx.try_recv().unwrap().step, Some(3));
        assert_eq!(rx.try_recv().unwrap().step, Some(4));
    }
}
