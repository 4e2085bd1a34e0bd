//! `MockStep` — a test double for [`Step`].
//!
//! Useful in engine tests where the real step bodies and their external
//! services are irrelevant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Patch, Snapshot, Step, StepError};

/// Behaviour injected into `MockStep` at construction time.
pub enum MockBehaviour {
    /// Return the given patch.
    Succeed(Patch),
    /// Fail with [`StepError::Failed`].
    Fail(String),
    /// Panic inside the step body.
    Panic(String),
}

/// A mock step that records every snapshot it receives and returns a
/// programmer-specified result, optionally after a delay.
pub struct MockStep {
    /// Label used in test assertions and in the shared journal.
    pub name: String,
    /// What the step will do when `run` is called.
    pub behaviour: MockBehaviour,
    /// Simulated latency before the behaviour is applied.
    pub delay: Option<Duration>,
    /// All snapshots seen by this step (in call order).
    pub calls: Arc<Mutex<Vec<Snapshot>>>,
    /// Optional journal shared between steps; each step appends its name on
    /// start and `"{name}:done"` on finish.
    pub journal: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockStep {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            journal: None,
        }
    }

    /// A step that always succeeds with `patch`.
    pub fn returning(name: impl Into<String>, patch: Patch) -> Self {
        Self::with_behaviour(name, MockBehaviour::Succeed(patch))
    }

    /// A step that writes a single slot.
    pub fn writing(name: impl Into<String>, slot: &str, value: Value) -> Self {
        Self::returning(name, Patch::new().with(slot, value))
    }

    /// A step that always fails with `msg`.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Fail(msg.into()))
    }

    /// A step that panics with `msg`.
    pub fn panicking(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Panic(msg.into()))
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn journaled(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Number of times this step has been run.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Handle onto the call log that stays valid after the step is moved
    /// into a graph.
    pub fn call_log(&self) -> Arc<Mutex<Vec<Snapshot>>> {
        Arc::clone(&self.calls)
    }

    fn note(&self, entry: String) {
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(entry);
        }
    }
}

#[async_trait]
impl Step for MockStep {
    async fn run(&self, snapshot: &Snapshot) -> Result<Patch, StepError> {
        self.calls.lock().unwrap().push(snapshot.clone());
        self.note(self.name.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let result = match &self.behaviour {
            MockBehaviour::Succeed(patch) => Ok(patch.clone()),
            MockBehaviour::Fail(msg) => Err(StepError::Failed(msg.clone())),
            MockBehaviour::Panic(msg) => panic!("{msg}"),
        };

        self.note(format!("{}:done", self.name));
        result
    }
}
