//! Per-invocation handle given to step handlers.
//!
//! A handler can only reach the outside world through its [`StepContext`]:
//! emitting further events and logging. The bus hands out a [`BusContext`];
//! tests use a [`RecordingContext`] to drive a step without a bus.

use std::fmt::{self, Display};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tracing::{warn, Level, Span};
use uuid::Uuid;

use crate::domain::{Event, EventId, Topic};

use super::bus::{CycleDetected, EmitError, Shared};
use super::registry::StepError;

/// Structured log fields: `&[("url", &url), ("chars", &len)]`
pub type LogFields<'a> = &'a [(&'a str, &'a dyn Display)];

/// What a handler can do besides computing
pub trait StepContext: Send + Sync {
    /// Name of the step being invoked
    fn step_name(&self) -> &str;

    /// Topic of the event being handled
    fn topic(&self) -> &Topic;

    /// Correlation id of the pipeline run, if the event carried one
    fn correlation_id(&self) -> Option<&str>;

    /// Queue a further event. Returns as soon as the event is queued.
    fn emit(&self, topic: &str, payload: Value) -> Result<EventId, EmitError>;

    /// Log within the invocation's scope
    fn log(&self, level: Level, message: &str, fields: LogFields<'_>);
}

impl<'a> dyn StepContext + 'a {
    /// Serialize `payload` and emit it
    pub fn emit_payload<T: Serialize>(&self, topic: &str, payload: &T) -> Result<EventId, StepError> {
        let value = serde_json::to_value(payload)
            .map_err(|e| StepError::Fault(anyhow::anyhow!("failed to serialize payload for '{}': {}", topic, e)))?;
        Ok(self.emit(topic, value)?)
    }

    pub fn info(&self, message: &str, fields: LogFields<'_>) {
        self.log(Level::INFO, message, fields);
    }

    pub fn warn(&self, message: &str, fields: LogFields<'_>) {
        self.log(Level::WARN, message, fields);
    }

    pub fn error(&self, message: &str, fields: LogFields<'_>) {
        self.log(Level::ERROR, message, fields);
    }
}

/// Carry the run's correlation id into an emitted payload.
///
/// `requestId` is inserted when absent and overwritten when it differs.
pub(crate) fn stamp_correlation(mut payload: Value, correlation_id: Option<&str>, step: &str) -> Value {
    let (Some(id), Some(object)) = (correlation_id, payload.as_object_mut()) else {
        return payload;
    };

    match object.get("requestId").and_then(Value::as_str) {
        Some(existing) if existing == id => {}
        Some(existing) => {
            warn!(
                %step,
                requested = existing,
                correlation_id = id,
                "Emitted payload carried a different requestId; keeping the run's id"
            );
            object.insert("requestId".to_string(), Value::String(id.to_string()));
        }
        None => {
            object.insert("requestId".to_string(), Value::String(id.to_string()));
        }
    }

    payload
}

fn render_fields(fields: LogFields<'_>) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Context backed by a running bus
pub struct BusContext {
    shared: Arc<Shared>,
    event: Arc<Event>,
    step: String,
    span: Span,
}

impl BusContext {
    pub(crate) fn new(shared: Arc<Shared>, event: Arc<Event>, step: String, span: Span) -> Self {
        Self {
            shared,
            event,
            step,
            span,
        }
    }
}

impl StepContext for BusContext {
    fn step_name(&self) -> &str {
        &self.step
    }

    fn topic(&self) -> &Topic {
        &self.event.topic
    }

    fn correlation_id(&self) -> Option<&str> {
        self.event.correlation_id.as_deref()
    }

    fn emit(&self, topic: &str, payload: Value) -> Result<EventId, EmitError> {
        let payload = stamp_correlation(payload, self.correlation_id(), &self.step);
        self.span
            .in_scope(|| self.shared.emit_derived(&self.event, &self.step, Topic::from(topic), payload))
    }

    fn log(&self, level: Level, message: &str, fields: LogFields<'_>) {
        let fields = render_fields(fields);
        self.span.in_scope(|| {
            if level == Level::ERROR {
                tracing::error!(fields = %fields, "{}", message);
            } else if level == Level::WARN {
                tracing::warn!(fields = %fields, "{}", message);
            } else if level == Level::INFO {
                tracing::info!(fields = %fields, "{}", message);
            } else if level == Level::DEBUG {
                tracing::debug!(fields = %fields, "{}", message);
            } else {
                tracing::trace!(fields = %fields, "{}", message);
            }
        });
    }
}

impl fmt::Debug for BusContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusContext")
            .field("step", &self.step)
            .field("event", &self.event.id)
            .finish()
    }
}

/// An event captured by [`RecordingContext`]
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    pub topic: Topic,
    pub payload: Value,
}

/// A log line captured by [`RecordingContext`]
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
    pub fields: String,
}

#[derive(Debug, Default)]
struct Recorded {
    emitted: Vec<EmittedEvent>,
    logs: Vec<LogEntry>,
}

/// Context that records instead of dispatching
#[derive(Debug)]
pub struct RecordingContext {
    step: String,
    topic: Topic,
    correlation_id: Option<String>,
    recorded: Mutex<Recorded>,
}

impl RecordingContext {
    pub fn new(step: impl Into<String>, topic: impl Into<Topic>, correlation_id: Option<&str>) -> Self {
        Self {
            step: step.into(),
            topic: topic.into(),
            correlation_id: correlation_id.map(str::to_string),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    pub fn emitted(&self) -> Vec<EmittedEvent> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .emitted
            .clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .logs
            .clone()
    }
}

impl StepContext for RecordingContext {
    fn step_name(&self) -> &str {
        &self.step
    }

    fn topic(&self) -> &Topic {
        &self.topic
    }

    fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    fn emit(&self, topic: &str, payload: Value) -> Result<EventId, EmitError> {
        let topic = Topic::from(topic);
        if topic == self.topic {
            return Err(EmitError::Cycle(CycleDetected {
                correlation_id: self.correlation_id.clone(),
                topic,
                lineage: vec![self.topic.clone()],
            }));
        }

        let payload = stamp_correlation(payload, self.correlation_id(), &self.step);
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .emitted
            .push(EmittedEvent { topic, payload });
        Ok(Uuid::new_v4())
    }

    fn log(&self, level: Level, message: &str, fields: LogFields<'_>) {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .logs
            .push(LogEntry {
                level,
                message: message.to_string(),
                fields: render_fields(fields),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stamp_inserts_missing_request_id() {
        let stamped = stamp_correlation(json!({"a": 1}), Some("r1"), "s");
        assert_eq!(stamped, json!({"a": 1, "requestId": "r1"}));
    }

    #[test]
    fn test_stamp_overwrites_foreign_request_id() {
        let stamped = stamp_correlation(json!({"requestId": "other"}), Some("r1"), "s");
        assert_eq!(stamped, json!({"requestId": "r1"}));
    }

    #[test]
    fn test_stamp_without_correlation_is_identity() {
        let payload = json!({"requestId": "x"});
        assert_eq!(stamp_correlation(payload.clone(), None, "s"), payload);
        assert_eq!(stamp_correlation(json!("text"), Some("r1"), "s"), json!("text"));
    }

    #[test]
    fn test_recording_context_captures_emits_and_logs() {
        let recording = RecordingContext::new("step", "in", Some("r1"));
        let ctx: &dyn StepContext = &recording;

        ctx.emit_payload("out", &json!({"x": 1})).unwrap();
        ctx.info("done", &[("count", &3)]);

        let emitted = recording.emitted();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].topic, Topic::from("out"));
        assert_eq!(emitted[0].payload, json!({"x": 1, "requestId": "r1"}));

        let logs = recording.logs();
        assert_eq!(logs[0].level, Level::INFO);
        assert_eq!(logs[0].fields, "count=3");
    }

    #[test]
    fn test_recording_context_rejects_self_emit() {
        let recording = RecordingContext::new("step", "loop", None);
        let err = recording.emit("loop", json!({})).unwrap_err();
        assert!(matches!(err, EmitError::Cycle(_)));
    }
}
