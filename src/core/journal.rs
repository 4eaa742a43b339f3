//! Completion/failure trail of every event the bus has seen.
//!
//! Since nobody awaits a pipeline run, the journal is how its outcome is
//! observed. Records live in memory; when a sink path is configured each
//! finalized record is also appended as one JSON line.
//!
//! Memory is bounded: once more than `max_records` records are held, the
//! oldest finished ones are evicted. Events still in flight are never
//! evicted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::domain::{Event, EventId, EventState, Invocation};

/// An event together with its lifecycle state and invocation outcomes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: Event,
    pub state: EventState,
    pub invocations: Vec<Invocation>,
}

impl EventRecord {
    /// Failed invocations of this event
    pub fn failures(&self) -> impl Iterator<Item = &Invocation> {
        self.invocations.iter().filter(|i| i.outcome.is_failed())
    }

    pub fn invocation(&self, step: &str) -> Option<&Invocation> {
        self.invocations.iter().find(|i| i.step == step)
    }
}

/// Default number of records kept in memory
pub const DEFAULT_MAX_RECORDS: usize = 1000;

#[derive(Debug, Default)]
struct Entries {
    order: Vec<EventId>,
    records: HashMap<EventId, EventRecord>,
}

impl Entries {
    /// Drop the oldest finished records until at most `max` remain
    fn evict(&mut self, max: usize) -> usize {
        let mut excess = self.records.len().saturating_sub(max);
        if excess == 0 {
            return 0;
        }

        let before = self.records.len();
        let records = &mut self.records;
        self.order.retain(|id| {
            if excess == 0 {
                return true;
            }
            match records.get(id) {
                Some(record) if record.state.is_terminal() => {
                    records.remove(id);
                    excess -= 1;
                    false
                }
                Some(_) => true,
                None => false,
            }
        });

        before - self.records.len()
    }
}

/// In-memory journal with an optional JSONL sink
#[derive(Debug)]
pub struct Journal {
    entries: Mutex<Entries>,
    sink: Option<PathBuf>,
    sink_lock: tokio::sync::Mutex<()>,
    max_records: usize,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Journal {
    pub fn new(sink: Option<PathBuf>) -> Self {
        Self {
            entries: Mutex::default(),
            sink,
            sink_lock: tokio::sync::Mutex::new(()),
            max_records: DEFAULT_MAX_RECORDS,
        }
    }

    /// Keep at most `max` records in memory
    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = max;
        self
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    pub fn sink(&self) -> Option<&Path> {
        self.sink.as_deref()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> T {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut entries)
    }

    /// Track a newly queued event
    pub fn record_queued(&self, event: &Event) {
        self.with_entries(|entries| {
            entries.order.push(event.id);
            entries.records.insert(
                event.id,
                EventRecord {
                    event: event.clone(),
                    state: EventState::Queued,
                    invocations: Vec::new(),
                },
            );
        });
    }

    pub fn set_state(&self, id: EventId, state: EventState) {
        self.with_entries(|entries| {
            if let Some(record) = entries.records.get_mut(&id) {
                record.state = state;
            }
        });
    }

    /// Record the final state and outcomes, append to the sink, then evict
    /// old finished records beyond the retention limit
    pub async fn finish(&self, id: EventId, state: EventState, invocations: Vec<Invocation>) -> Result<()> {
        let max = self.max_records;
        let record = self.with_entries(|entries| {
            let record = entries.records.get_mut(&id).map(|record| {
                record.state = state;
                record.invocations = invocations;
                record.clone()
            });

            let evicted = entries.evict(max);
            if evicted > 0 {
                debug!(evicted, retained = entries.records.len(), "Evicted finished journal records");
            }
            record
        });

        match (record, &self.sink) {
            (Some(record), Some(path)) => self.append(path, &record).await,
            _ => Ok(()),
        }
    }

    async fn append(&self, path: &Path, record: &EventRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("Failed to serialize event record")?;

        let _guard = self.sink_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open journal: {}", path.display()))?;

        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .context("Failed to write journal record")?;
        file.flush().await.context("Failed to flush journal")?;

        Ok(())
    }

    pub fn get(&self, id: EventId) -> Option<EventRecord> {
        self.with_entries(|entries| entries.records.get(&id).cloned())
    }

    /// All records in emission order
    pub fn records(&self) -> Vec<EventRecord> {
        self.with_entries(|entries| {
            entries
                .order
                .iter()
                .filter_map(|id| entries.records.get(id).cloned())
                .collect()
        })
    }

    pub fn for_correlation(&self, correlation_id: &str) -> Vec<EventRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.event.correlation_id.as_deref() == Some(correlation_id))
            .collect()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<EventRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.event.topic.as_str() == topic)
            .collect()
    }

    /// Read a JSONL sink back into records
    pub async fn replay(path: &Path) -> Result<Vec<EventRecord>> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read journal: {}", path.display()))?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("Malformed journal record on line {}", n + 1))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailureReason, InvocationOutcome, Topic};
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lifecycle_and_queries() {
        let journal = Journal::new(None);
        let event = Event::new(Topic::from("t"), json!({"requestId": "r1"}));
        journal.record_queued(&event);
        assert_eq!(journal.get(event.id).unwrap().state, EventState::Queued);

        journal.set_state(event.id, EventState::Dispatched { subscribers: 1 });
        let invocation = Invocation::new("s", &event)
            .finish(InvocationOutcome::Failed(FailureReason::Cancelled));
        journal
            .finish(event.id, EventState::Failed, vec![invocation])
            .await
            .unwrap();

        let record = journal.get(event.id).unwrap();
        assert_eq!(record.state, EventState::Failed);
        assert_eq!(record.failures().count(), 1);
        assert_eq!(journal.for_correlation("r1").len(), 1);
        assert_eq!(journal.on_topic("t").len(), 1);
        assert!(journal.on_topic("other").is_empty());
    }

    #[tokio::test]
    async fn test_oldest_finished_records_are_evicted() {
        let journal = Journal::new(None).with_max_records(2);

        let in_flight = Event::new(Topic::from("slow"), json!({}));
        journal.record_queued(&in_flight);

        let mut finished = Vec::new();
        for topic in ["a", "b", "c"] {
            let event = Event::new(Topic::from(topic), json!({}));
            journal.record_queued(&event);
            journal
                .finish(event.id, EventState::Completed, Vec::new())
                .await
                .unwrap();
            finished.push(event.id);
        }

        // The in-flight record survives; only the newest finished one fits
        assert!(journal.get(in_flight.id).is_some());
        assert!(journal.get(finished[0]).is_none());
        assert!(journal.get(finished[1]).is_none());
        assert!(journal.get(finished[2]).is_some());
        assert_eq!(journal.records().len(), 2);
        assert_eq!(journal.records()[0].event.id, in_flight.id);
    }

    #[tokio::test]
    async fn test_sink_keeps_evicted_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = Journal::new(Some(path.clone())).with_max_records(1);

        for topic in ["a", "b", "c"] {
            let event = Event::new(Topic::from(topic), json!({}));
            journal.record_queued(&event);
            journal
                .finish(event.id, EventState::Completed, Vec::new())
                .await
                .unwrap();
        }

        assert_eq!(journal.records().len(), 1);
        assert_eq!(Journal::replay(&path).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sink_appends_finished_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = Journal::new(Some(path.clone()));

        for topic in ["a", "b"] {
            let event = Event::new(Topic::from(topic), json!({}));
            journal.record_queued(&event);
            journal
                .finish(event.id, EventState::Completed, Vec::new())
                .await
                .unwrap();
        }

        let replayed = Journal::replay(&path).await.unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].event.topic, Topic::from("a"));
        assert_eq!(replayed[1].state, EventState::Completed);
    }
}
