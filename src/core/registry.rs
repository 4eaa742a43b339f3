//! Step registration and topic lookup.
//!
//! The registry is filled once at startup and is read-only afterwards;
//! the bus holds it behind an `Arc` and never locks it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{info, warn};

use crate::adapters::{CollaboratorError, GenerationError, ScrapeError};
use crate::domain::{FailureReason, Topic};

use super::bus::EmitError;
use super::context::StepContext;
use super::schema::{Schema, ValidPayload, ValidationError};

/// Error returned by a step handler
#[derive(Debug, Error)]
pub enum StepError {
    /// A scrape or generation collaborator failed
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// A further event could not be emitted (cycle or shutdown)
    #[error(transparent)]
    Emit(#[from] EmitError),

    /// Anything else
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl From<ScrapeError> for StepError {
    fn from(e: ScrapeError) -> Self {
        Self::Collaborator(e.into())
    }
}

impl From<GenerationError> for StepError {
    fn from(e: GenerationError) -> Self {
        Self::Collaborator(e.into())
    }
}

impl StepError {
    /// How this error is recorded against the invocation
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Collaborator(CollaboratorError::Scrape(e)) => {
                FailureReason::Scrape(e.reason.clone())
            }
            Self::Collaborator(CollaboratorError::Generation(e)) => {
                FailureReason::Generation(e.reason.clone())
            }
            Self::Emit(EmitError::Cycle(e)) => FailureReason::CycleDetected(e.to_string()),
            Self::Emit(e @ EmitError::Closed(_)) => FailureReason::Fault(e.to_string()),
            Self::Fault(e) => FailureReason::Fault(format!("{:#}", e)),
        }
    }

    /// Faults are re-raised to the process fault reporter; the other
    /// variants are expected failure modes.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

/// A unit of work reacting to events.
///
/// The handler receives its input already validated and decoded, plus a
/// context that is its only way to emit further events or log.
#[async_trait]
pub trait Step: Send + Sync + 'static {
    /// Decoded input type
    type Input: DeserializeOwned + Send + 'static;

    async fn handle(&self, input: Self::Input, ctx: &dyn StepContext) -> Result<(), StepError>;
}

/// Future returned by a bound invocation
pub type StepFuture = Pin<Box<dyn Future<Output = Result<(), StepError>> + Send>>;

/// An invocation whose input has been decoded and is ready to run
pub type BoundInvocation = Box<dyn FnOnce(Arc<dyn StepContext>) -> StepFuture + Send>;

/// Type-erased handler stored in a descriptor
pub trait Handler: Send + Sync {
    /// Decode a validated payload into the step's input
    fn bind(&self, payload: ValidPayload, schema: &str) -> Result<BoundInvocation, ValidationError>;
}

struct TypedHandler<S> {
    step: Arc<S>,
}

impl<S: Step> Handler for TypedHandler<S> {
    fn bind(&self, payload: ValidPayload, schema: &str) -> Result<BoundInvocation, ValidationError> {
        let input: S::Input = serde_json::from_value(payload.into_value())
            .map_err(|e| ValidationError::decode(schema, e.to_string()))?;

        let step = Arc::clone(&self.step);
        Ok(Box::new(move |ctx: Arc<dyn StepContext>| -> StepFuture {
            Box::pin(async move { step.handle(input, ctx.as_ref()).await })
        }))
    }
}

/// Identity, topics, input contract and handler of one step
#[derive(Clone)]
pub struct StepDescriptor {
    /// Unique step name
    pub name: String,

    /// Topics this step reacts to
    pub subscribes: BTreeSet<Topic>,

    /// Topics this step may emit (advisory)
    pub emits: BTreeSet<Topic>,

    /// Contract checked before the handler runs
    pub input_schema: Schema,

    handler: Arc<dyn Handler>,
}

impl StepDescriptor {
    /// Describe `step` under `name`. The input schema defaults to "any object".
    pub fn new<S: Step>(name: impl Into<String>, step: S) -> Self {
        let name = name.into();
        Self {
            input_schema: Schema::any_object(name.clone()),
            name,
            subscribes: BTreeSet::new(),
            emits: BTreeSet::new(),
            handler: Arc::new(TypedHandler {
                step: Arc::new(step),
            }),
        }
    }

    pub fn subscribe(mut self, topic: impl Into<Topic>) -> Self {
        self.subscribes.insert(topic.into());
        self
    }

    pub fn declare_emit(mut self, topic: impl Into<Topic>) -> Self {
        self.emits.insert(topic.into());
        self
    }

    pub fn input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDescriptor")
            .field("name", &self.name)
            .field("subscribes", &self.subscribes)
            .field("emits", &self.emits)
            .field("input_schema", &self.input_schema.name)
            .finish_non_exhaustive()
    }
}

/// Two steps registered under the same name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step '{name}' is already registered")]
pub struct DuplicateStepError {
    pub name: String,
}

/// All registered steps, in registration order
#[derive(Debug, Default)]
pub struct StepRegistry {
    steps: Vec<StepDescriptor>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step. Names must be unique.
    pub fn register(&mut self, descriptor: StepDescriptor) -> Result<(), DuplicateStepError> {
        if self.get(&descriptor.name).is_some() {
            return Err(DuplicateStepError {
                name: descriptor.name,
            });
        }
        self.steps.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&StepDescriptor> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn steps(&self) -> &[StepDescriptor] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps subscribed to `topic`, in registration order
    pub fn subscribers_of(&self, topic: &str) -> Vec<&StepDescriptor> {
        self.steps
            .iter()
            .filter(|s| s.subscribes.contains(topic))
            .collect()
    }

    /// Steps declaring they may emit `topic`. Advisory only; dispatch never
    /// consults this.
    pub fn emitters_declaring(&self, topic: &str) -> Vec<&StepDescriptor> {
        self.steps
            .iter()
            .filter(|s| s.emits.contains(topic))
            .collect()
    }

    /// Every topic mentioned by any step
    pub fn topics(&self) -> BTreeSet<Topic> {
        self.steps
            .iter()
            .flat_map(|s| s.subscribes.iter().chain(s.emits.iter()))
            .cloned()
            .collect()
    }

    /// Startup-time check of the declared topology
    pub fn consistency_report(&self) -> ConsistencyReport {
        let mut report = ConsistencyReport::default();

        for step in &self.steps {
            for topic in &step.emits {
                if self.subscribers_of(topic.as_str()).is_empty() {
                    report.unconsumed.push((step.name.clone(), topic.clone()));
                }
            }
            for topic in &step.subscribes {
                if self.emitters_declaring(topic.as_str()).is_empty() {
                    report.entry_points.push((step.name.clone(), topic.clone()));
                }
            }
        }

        report.cycles = self.declared_cycles();
        report
    }

    /// Topic -> topics emitted by its subscribers
    fn topic_graph(&self) -> BTreeMap<&Topic, BTreeSet<&Topic>> {
        let mut graph: BTreeMap<&Topic, BTreeSet<&Topic>> = BTreeMap::new();
        for step in &self.steps {
            for input in &step.subscribes {
                graph.entry(input).or_default().extend(step.emits.iter());
            }
        }
        graph
    }

    fn declared_cycles(&self) -> Vec<Vec<Topic>> {
        let graph = self.topic_graph();
        let mut done = BTreeSet::new();
        let mut cycles = Vec::new();

        for &start in graph.keys() {
            let mut path = Vec::new();
            walk(start, &graph, &mut path, &mut done, &mut cycles);
        }

        cycles
    }
}

fn walk<'a>(
    node: &'a Topic,
    graph: &BTreeMap<&'a Topic, BTreeSet<&'a Topic>>,
    path: &mut Vec<&'a Topic>,
    done: &mut BTreeSet<&'a Topic>,
    cycles: &mut Vec<Vec<Topic>>,
) {
    if let Some(pos) = path.iter().position(|t| *t == node) {
        cycles.push(path[pos..].iter().map(|t| (*t).clone()).collect());
        return;
    }
    if done.contains(node) {
        return;
    }

    path.push(node);
    if let Some(next) = graph.get(node) {
        for topic in next {
            walk(topic, graph, path, done, cycles);
        }
    }
    path.pop();
    done.insert(node);
}

/// Findings of [`StepRegistry::consistency_report`]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConsistencyReport {
    /// (step, topic): declared emits that no step subscribes to. Valid for
    /// terminal topics but worth a look.
    pub unconsumed: Vec<(String, Topic)>,

    /// (step, topic): subscriptions no step declares it emits, i.e. entry
    /// points fed from outside
    pub entry_points: Vec<(String, Topic)>,

    /// Topic cycles in the declared graph
    pub cycles: Vec<Vec<Topic>>,
}

impl ConsistencyReport {
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Write the findings to the log
    pub fn log(&self) {
        for (step, topic) in &self.unconsumed {
            warn!(%step, %topic, "Step emits a topic no step subscribes to");
        }
        for (step, topic) in &self.entry_points {
            info!(%step, %topic, "Topic is only fed from outside the pipeline");
        }
        for cycle in &self.cycles {
            let chain = cycle
                .iter()
                .map(Topic::as_str)
                .collect::<Vec<_>>()
                .join(" -> ");
            warn!(%chain, "Declared topology contains a topic cycle");
        }
    }
}
