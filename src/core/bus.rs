//! Event bus: queue, dispatch, fan-out and failure isolation.
//!
//! ```text
//! emit() ──► queue ──► dispatcher ──► validate per subscriber ──┬─► invoke (task) ─┐
//!   ▲                                                           ├─► invoke (task) ─┼─► settle ─► journal
//!   │                                                           └─► rejected ──────┘
//!   └──────────── StepContext::emit (same correlation id) ◄── handler
//! ```
//!
//! - `emit` only enqueues; it never waits for downstream work.
//! - Each subscriber validates the payload against its own schema. A
//!   rejection is recorded against that subscriber alone.
//! - Invocations run as separate tasks, bounded by a permit pool, so a slow
//!   handler never stalls dispatch of other events.
//! - A handler error or panic is caught, recorded and reported; siblings
//!   and the bus carry on.
//! - Re-emitting a topic already in an event's causal chain is rejected.

use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::domain::{
    Event, EventId, EventState, FailureReason, Invocation, InvocationOutcome, Topic,
};

use super::context::{BusContext, StepContext};
use super::journal::{Journal, DEFAULT_MAX_RECORDS};
use super::registry::{BoundInvocation, StepRegistry};
use super::schema::validate;

/// Tunables for the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    /// Maximum number of handlers running at once (default: 8)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// How long shutdown waits for in-flight work (default: 30s)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,

    /// Append finalized event records to this JSONL file
    #[serde(default)]
    pub journal_path: Option<PathBuf>,

    /// Finished records kept in memory; older ones are evicted (default: 1000)
    #[serde(default = "default_journal_max_records")]
    pub journal_max_records: usize,
}

fn default_max_concurrency() -> usize {
    8
}
fn default_shutdown_grace() -> u64 {
    30
}
fn default_journal_max_records() -> usize {
    DEFAULT_MAX_RECORDS
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            shutdown_grace_seconds: default_shutdown_grace(),
            journal_path: None,
            journal_max_records: default_journal_max_records(),
        }
    }
}

impl BusSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

/// A topic re-emitted within its own causal chain
#[derive(Debug, Clone, PartialEq, Error)]
#[error("topic '{topic}' already occurs in the chain of correlation id {} ({})", or_none(.correlation_id), render_chain(.lineage))]
pub struct CycleDetected {
    pub correlation_id: Option<String>,
    pub topic: Topic,
    /// Causal chain leading to the rejected emit
    pub lineage: Vec<Topic>,
}

fn or_none(id: &Option<String>) -> &str {
    id.as_deref().unwrap_or("<none>")
}

fn render_chain(lineage: &[Topic]) -> String {
    lineage
        .iter()
        .map(Topic::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Why an emit was refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmitError {
    #[error(transparent)]
    Cycle(#[from] CycleDetected),

    #[error("bus is shutting down; event on '{0}' rejected")]
    Closed(Topic),
}

/// A handler fault, forwarded to the process-level reporter
#[derive(Debug, Clone)]
pub struct HandlerFault {
    pub step: String,
    pub topic: Topic,
    pub event_id: EventId,
    pub correlation_id: Option<String>,
    pub message: String,
}

/// Top-level sink for handler faults
pub trait FaultReporter: Send + Sync {
    fn report(&self, fault: &HandlerFault);
}

/// Reports faults through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFaultReporter;

impl FaultReporter for LogFaultReporter {
    fn report(&self, fault: &HandlerFault) {
        error!(
            target: "postflow::fault",
            step = %fault.step,
            topic = %fault.topic,
            event_id = %fault.event_id,
            correlation_id = fault.correlation_id.as_deref().unwrap_or("-"),
            "Unhandled handler fault: {}",
            fault.message
        );
    }
}

/// How a shutdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// All in-flight work finished within the grace period
    Drained,

    /// The grace period elapsed and remaining invocations were cancelled
    Cancelled,
}

/// State shared by the bus handle, the dispatcher, invocations and contexts
pub(crate) struct Shared {
    registry: Arc<StepRegistry>,
    queue: mpsc::UnboundedSender<Arc<Event>>,
    journal: Journal,
    permits: Arc<Semaphore>,
    pending: watch::Sender<usize>,
    cancel: watch::Sender<bool>,
    closed: AtomicBool,
    reporter: Arc<dyn FaultReporter>,
}

/// Handle to a running bus.
///
/// Dropping the handle stops the dispatcher; call [`EventBus::shutdown`]
/// first to let in-flight work finish.
pub struct EventBus {
    shared: Arc<Shared>,
    dispatcher: JoinHandle<()>,
}

impl EventBus {
    /// Start a bus over `registry`. Must be called inside a tokio runtime.
    pub fn start(registry: StepRegistry, settings: &BusSettings) -> Self {
        Self::start_with_reporter(registry, settings, Arc::new(LogFaultReporter))
    }

    pub fn start_with_reporter(
        registry: StepRegistry,
        settings: &BusSettings,
        reporter: Arc<dyn FaultReporter>,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0usize);
        let (cancel, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            registry: Arc::new(registry),
            queue,
            journal: Journal::new(settings.journal_path.clone())
                .with_max_records(settings.journal_max_records),
            permits: Arc::new(Semaphore::new(settings.max_concurrency.max(1))),
            pending,
            cancel,
            closed: AtomicBool::new(false),
            reporter,
        });

        let dispatcher = tokio::spawn(dispatch_loop(Arc::clone(&shared), rx));

        Self { shared, dispatcher }
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.shared.registry
    }

    pub fn journal(&self) -> &Journal {
        &self.shared.journal
    }

    /// Queue an originating event. Its `requestId`, if any, becomes the
    /// correlation id of everything derived from it.
    pub fn emit(&self, topic: impl Into<Topic>, payload: Value) -> Result<EventId, EmitError> {
        let topic = topic.into();
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(EmitError::Closed(topic));
        }
        Ok(self.shared.enqueue(Event::new(topic, payload)))
    }

    /// Number of events queued or in flight
    pub fn pending(&self) -> usize {
        *self.shared.pending.borrow()
    }

    /// Resolve once nothing is queued or in flight
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Stop accepting new events, wait up to `grace` for in-flight work,
    /// then cancel whatever is left.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownOutcome {
        self.shared.closed.store(true, Ordering::SeqCst);
        info!(pending = self.pending(), "Shutting down event bus");

        let outcome = if tokio::time::timeout(grace, self.wait_idle()).await.is_ok() {
            ShutdownOutcome::Drained
        } else {
            warn!(
                pending = self.pending(),
                grace_ms = grace.as_millis() as u64,
                "Grace period elapsed, cancelling in-flight invocations"
            );
            self.shared.cancel.send_replace(true);
            self.wait_idle().await;
            ShutdownOutcome::Cancelled
        };

        self.dispatcher.abort();
        outcome
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch_loop(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Arc<Event>>) {
    while let Some(event) = rx.recv().await {
        shared.dispatch(event);
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|c| *c).await;
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

impl Shared {
    fn enqueue(&self, event: Event) -> EventId {
        let id = event.id;
        debug!(event_id = %id, topic = %event.topic, correlation_id = ?event.correlation_id, "Event queued");

        self.journal.record_queued(&event);
        self.pending.send_modify(|n| *n += 1);

        if self.queue.send(Arc::new(event)).is_err() {
            error!(event_id = %id, "Dispatcher is gone; dropping event");
            self.journal.set_state(id, EventState::Failed);
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
        }

        id
    }

    /// Queue an event emitted by the handler of `parent`
    pub(crate) fn emit_derived(
        &self,
        parent: &Event,
        step: &str,
        topic: Topic,
        payload: Value,
    ) -> Result<EventId, EmitError> {
        if *self.cancel.borrow() {
            return Err(EmitError::Closed(topic));
        }

        if parent.would_cycle(&topic) {
            let mut lineage = parent.lineage.clone();
            lineage.push(parent.topic.clone());
            let err = CycleDetected {
                correlation_id: parent.correlation_id.clone(),
                topic,
                lineage,
            };
            error!(%step, error = %err, "Rejected cyclic emit; aborting this chain");
            return Err(err.into());
        }

        let declared = self
            .registry
            .get(step)
            .map_or(true, |d| d.emits.contains(topic.as_str()));
        if !declared {
            warn!(%step, %topic, "Step emitted a topic it does not declare");
        }

        Ok(self.enqueue(Event::derived(parent, topic, payload)))
    }

    fn dispatch(self: &Arc<Self>, event: Arc<Event>) {
        self.journal.set_state(event.id, EventState::Validating);

        let subscribers = self.registry.subscribers_of(event.topic.as_str());
        let mut running = JoinSet::new();
        let mut rejected = Vec::new();

        for step in &subscribers {
            let invocation = Invocation::new(&step.name, &event);
            let bound = validate(&step.input_schema, &event.payload)
                .and_then(|payload| step.handler().bind(payload, &step.input_schema.name));

            match bound {
                Ok(bound) => {
                    running.spawn(Arc::clone(self).invoke(
                        step.name.clone(),
                        Arc::clone(&event),
                        invocation,
                        bound,
                    ));
                }
                Err(e) => {
                    warn!(
                        step = %step.name,
                        topic = %event.topic,
                        correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
                        error = %e,
                        "Payload rejected by subscriber schema"
                    );
                    rejected.push(invocation.finish(InvocationOutcome::Failed(
                        FailureReason::Validation(e),
                    )));
                }
            }
        }

        self.journal.set_state(
            event.id,
            EventState::Dispatched {
                subscribers: subscribers.len(),
            },
        );

        tokio::spawn(Arc::clone(self).settle(event, running, rejected));
    }

    async fn invoke(
        self: Arc<Self>,
        step: String,
        event: Arc<Event>,
        invocation: Invocation,
        bound: BoundInvocation,
    ) -> Invocation {
        let mut cancel = self.cancel.subscribe();

        let _permit = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                return invocation.finish(InvocationOutcome::Failed(FailureReason::Cancelled));
            }
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };

        let span = info_span!(
            "invocation",
            step = %step,
            topic = %event.topic,
            correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
            event_id = %event.id,
        );
        let ctx: Arc<dyn StepContext> = Arc::new(BusContext::new(
            Arc::clone(&self),
            Arc::clone(&event),
            step.clone(),
            span.clone(),
        ));

        let handler = tokio::spawn(bound(ctx).instrument(span));
        let abort = handler.abort_handle();

        let joined = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                abort.abort();
                warn!(%step, topic = %event.topic, "Invocation cancelled by shutdown");
                return invocation.finish(InvocationOutcome::Failed(FailureReason::Cancelled));
            }
            joined = handler => joined,
        };

        let outcome = match joined {
            Ok(Ok(())) => {
                debug!(%step, topic = %event.topic, "Invocation succeeded");
                InvocationOutcome::Succeeded
            }
            Ok(Err(e)) => {
                error!(
                    %step,
                    topic = %event.topic,
                    correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
                    error = %e,
                    "Invocation failed"
                );
                if e.is_fault() {
                    self.report(&step, &event, format!("{:#}", e));
                }
                InvocationOutcome::Failed(e.failure_reason())
            }
            Err(join_error) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic());
                error!(
                    %step,
                    topic = %event.topic,
                    correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
                    %message,
                    "Handler panicked"
                );
                self.report(&step, &event, message.clone());
                InvocationOutcome::Failed(FailureReason::Fault(message))
            }
            Err(_) => InvocationOutcome::Failed(FailureReason::Cancelled),
        };

        invocation.finish(outcome)
    }

    fn report(&self, step: &str, event: &Event, message: String) {
        self.reporter.report(&HandlerFault {
            step: step.to_string(),
            topic: event.topic.clone(),
            event_id: event.id,
            correlation_id: event.correlation_id.clone(),
            message,
        });
    }

    async fn settle(
        self: Arc<Self>,
        event: Arc<Event>,
        mut running: JoinSet<Invocation>,
        mut invocations: Vec<Invocation>,
    ) {
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(invocation) => invocations.push(invocation),
                Err(e) => error!(event_id = %event.id, error = %e, "Invocation task was lost"),
            }
        }

        let state = EventState::settle(&invocations);
        match state {
            EventState::Completed => debug!(
                event_id = %event.id,
                topic = %event.topic,
                invocations = invocations.len(),
                "Event completed"
            ),
            _ => info!(
                event_id = %event.id,
                topic = %event.topic,
                correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
                state = ?state,
                failed = invocations.iter().filter(|i| i.outcome.is_failed()).count(),
                "Event settled with failures"
            ),
        }

        if let Err(e) = self.journal.finish(event.id, state, invocations).await {
            warn!(event_id = %event.id, error = %e, "Failed to append journal record");
        }

        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = BusSettings::default();
        assert_eq!(settings.max_concurrency, 8);
        assert_eq!(settings.shutdown_grace(), Duration::from_secs(30));
        assert!(settings.journal_path.is_none());
        assert_eq!(settings.journal_max_records, 1000);
    }

    #[test]
    fn test_settings_yaml_defaults() {
        let settings: BusSettings = serde_yaml::from_str("max_concurrency: 2").unwrap();
        assert_eq!(settings.max_concurrency, 2);
        assert_eq!(settings.shutdown_grace_seconds, 30);
    }

    #[test]
    fn test_cycle_message_names_chain() {
        let err = CycleDetected {
            correlation_id: Some("r1".into()),
            topic: Topic::from("a"),
            lineage: vec![Topic::from("a"), Topic::from("b")],
        };
        let message = err.to_string();
        assert!(message.contains("'a'"));
        assert!(message.contains("r1"));
        assert!(message.contains("a -> b"));
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(3)), "handler panicked");
    }
}
