use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

pub const FILTER_PROGRESS: &str = "filter.progress";
pub const FILTER_APPLIED: &str = "filter.applied";
pub const FILTER_CLEARED: &str = "filter.cleared";
pub const FILTER_INVALID_RANGE: &str = "filter.invalid_range";
pub const FILTER_FAILED: &str = "filter.failed";
pub const FILTER_EXTERNAL_SYNC: &str = "filter.external_sync";

/// Side-effect channel to the UI: progress and user-facing notices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatorEvent {
    pub event_id: String,
    pub r#type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

pub type EventSink = Arc<dyn Fn(NavigatorEvent) + Send + Sync>;

#[derive(Clone, Default)]
pub struct EventEmitter {
    sink: Option<EventSink>,
}

impl EventEmitter {
    pub fn new(sink: EventSink) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn emit(&self, event_type: &str, payload: serde_json::Value) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        sink(NavigatorEvent {
            event_id: Uuid::new_v4().to_string(),
            r#type: event_type.to_string(),
            payload,
            timestamp: Utc::now(),
        });
    }
}

/// Sink that keeps every event; handy for hosts that poll.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<NavigatorEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> EventSink {
        let events = self.events.clone();
        Arc::new(move |event: NavigatorEvent| {
            events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
        })
    }

    pub fn events(&self) -> Vec<NavigatorEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<NavigatorEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.r#type == event_type)
            .cloned()
            .collect()
    }

    pub fn drain(&self) -> Vec<NavigatorEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::{EventEmitter, EventLog, FILTER_APPLIED, FILTER_FAILED};
    use serde_json::json;

    #[test]
    fn emitted_events_get_unique_ids() {
        let log = EventLog::new();
        let emitter = EventEmitter::new(log.sink());
        emitter.emit(FILTER_APPLIED, json!({ "visible": 3 }));
        emitter.emit(FILTER_FAILED, json!({ "message": "nope" }));

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_ne!(events[0].event_id, events[1].event_id);
        assert_eq!(log.of_type(FILTER_APPLIED)[0].payload["visible"], 3);
        assert_eq!(log.drain().len(), 2);
        assert!(log.events().is_empty());
    }

    #[test]
    fn silent_emitter_drops_events() {
        EventEmitter::silent().emit(FILTER_APPLIED, json!({}));
    }
}
