//! Event and invocation records for the orchestration bus.
//!
//! Events are immutable once emitted. The bus owns each event from
//! creation until every subscriber has been dispatched, and records the
//! outcome of each invocation alongside it.

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::schema::ValidationError;

/// Unique identifier of an emitted event
pub type EventId = Uuid;

/// Named event channel connecting emitters to subscribers.
///
/// Topics are not enumerated anywhere; they exist because some step
/// subscribes to or emits them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A single emitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: EventId,

    /// Topic the event was emitted on
    pub topic: Topic,

    /// Opaque structured payload
    pub payload: serde_json::Value,

    /// When the event was emitted
    pub emitted_at: DateTime<Utc>,

    /// Correlation id shared by every event of one pipeline run
    pub correlation_id: Option<String>,

    /// Event whose handler emitted this one (None for originating events)
    pub parent: Option<EventId>,

    /// Topics of every ancestor event, oldest first
    pub lineage: Vec<Topic>,
}

fn request_id_of(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("requestId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

impl Event {
    /// Create an originating event (no parent)
    pub fn new(topic: Topic, payload: serde_json::Value) -> Self {
        let correlation_id = request_id_of(&payload);

        Self {
            id: Uuid::new_v4(),
            topic,
            payload,
            emitted_at: Utc::now(),
            correlation_id,
            parent: None,
            lineage: Vec::new(),
        }
    }

    /// Create an event derived from `parent`, inheriting its correlation id
    /// and extending its lineage. A chain that started without a
    /// `requestId` picks up the first one a derived payload carries.
    pub fn derived(parent: &Event, topic: Topic, payload: serde_json::Value) -> Self {
        let mut lineage = parent.lineage.clone();
        lineage.push(parent.topic.clone());

        Self {
            id: Uuid::new_v4(),
            topic,
            emitted_at: Utc::now(),
            correlation_id: parent
                .correlation_id
                .clone()
                .or_else(|| request_id_of(&payload)),
            payload,
            parent: Some(parent.id),
            lineage,
        }
    }

    /// True if emitting `topic` from this event's handler would re-trigger
    /// a topic already present in the causal chain.
    pub fn would_cycle(&self, topic: &Topic) -> bool {
        &self.topic == topic || self.lineage.contains(topic)
    }
}

/// Lifecycle of an event inside the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    /// Accepted by `emit`, waiting in the queue
    Queued,

    /// Payload is being checked against each subscriber's schema
    Validating,

    /// Handed to `subscribers` invocations
    Dispatched { subscribers: usize },

    /// Every invocation succeeded (or there were no subscribers)
    Completed,

    /// Some invocations succeeded, some failed
    PartiallyFailed,

    /// Every invocation failed
    Failed,
}

impl EventState {
    /// Whether the event has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyFailed | Self::Failed
        )
    }

    /// Derive the final state from invocation outcomes
    pub fn settle(invocations: &[Invocation]) -> Self {
        let failed = invocations.iter().filter(|i| i.outcome.is_failed()).count();

        if failed == 0 {
            Self::Completed
        } else if failed == invocations.len() {
            Self::Failed
        } else {
            Self::PartiallyFailed
        }
    }
}

/// Runtime record of one handler execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Step that was (or would have been) invoked
    pub step: String,

    /// Event being handled
    pub event_id: EventId,

    /// Correlation id of the event
    pub correlation_id: Option<String>,

    /// When the invocation was created
    pub started_at: DateTime<Utc>,

    /// When the outcome was recorded
    pub finished_at: Option<DateTime<Utc>>,

    /// Outcome of the invocation
    pub outcome: InvocationOutcome,
}

impl Invocation {
    pub fn new(step: impl Into<String>, event: &Event) -> Self {
        Self {
            step: step.into(),
            event_id: event.id,
            correlation_id: event.correlation_id.clone(),
            started_at: Utc::now(),
            finished_at: None,
            outcome: InvocationOutcome::Running,
        }
    }

    /// Record the outcome and stamp the finish time
    pub fn finish(mut self, outcome: InvocationOutcome) -> Self {
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

/// Result of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum InvocationOutcome {
    /// Handler is still running
    Running,

    /// Handler returned successfully
    Succeeded,

    /// Handler was not invoked or did not succeed
    Failed(FailureReason),
}

impl InvocationOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Why an invocation failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FailureReason {
    /// Payload rejected before the handler ran
    Validation(ValidationError),

    /// Scrape collaborator failed
    Scrape(String),

    /// Generation collaborator failed
    Generation(String),

    /// Handler emitted a topic already present in its causal chain
    CycleDetected(String),

    /// Any other handler error or panic
    Fault(String),

    /// Abandoned during shutdown
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "validation failed: {}", e),
            Self::Scrape(e) => write!(f, "scrape failed: {}", e),
            Self::Generation(e) => write!(f, "generation failed: {}", e),
            Self::CycleDetected(e) => write!(f, "cycle detected: {}", e),
            Self::Fault(e) => write!(f, "handler fault: {}", e),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
