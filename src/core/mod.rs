//! Core orchestration logic.
//!
//! This module contains:
//! - Schema: Payload contracts and validation
//! - Registry: Step descriptors and topic lookup
//! - Context: The per-invocation handle given to handlers
//! - Bus: Queueing, dispatch, fan-out and failure isolation
//! - Journal: Completion/failure trail of every event

pub mod bus;
pub mod context;
pub mod journal;
pub mod registry;
pub mod schema;

// Re-export commonly used types
pub use bus::{
    BusSettings, CycleDetected, EmitError, EventBus, FaultReporter, HandlerFault,
    LogFaultReporter, ShutdownOutcome,
};
pub use context::{BusContext, EmittedEvent, LogEntry, RecordingContext, StepContext};
pub use journal::{EventRecord, Journal};
pub use registry::{
    ConsistencyReport, DuplicateStepError, Step, StepDescriptor, StepError, StepRegistry,
};
pub use schema::{validate, FieldType, Format, Schema, ValidPayload, ValidationError, Violation};
