//! The state container: one accumulative document per pipeline run.
//!
//! Slots are append-only. A slot, once written, is never rewritten; the
//! shared `error` slot keeps the first failure it receives. Only the executor
//! mutates a `State`; steps see [`Snapshot`]s and hand back [`Patch`]es.
//!
//! Seed slots may carry a binary blob (the artifact bytes). Blobs are shared
//! with every snapshot that declares the slot and are never serialized.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use steps::{slots, Patch, Snapshot};

use crate::models::{StepDescriptor, StepFailure};
use crate::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct State {
    slots: BTreeMap<String, Value>,
    #[serde(skip)]
    blobs: BTreeMap<String, Arc<[u8]>>,
    error: Option<StepFailure>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// A state with one seeded slot.
    pub fn seeded(slot: impl Into<String>, value: Value) -> Self {
        let mut slots = BTreeMap::new();
        slots.insert(slot.into(), value);
        Self {
            slots,
            ..Self::default()
        }
    }

    /// Attach a blob to `slot`.
    pub fn with_blob(mut self, slot: impl Into<String>, bytes: Arc<[u8]>) -> Self {
        self.blobs.insert(slot.into(), bytes);
        self
    }

    pub fn blob(&self, slot: &str) -> Option<&Arc<[u8]>> {
        self.blobs.get(slot)
    }

    pub fn get(&self, slot: &str) -> Option<&Value> {
        self.slots.get(slot)
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    pub fn slots(&self) -> &BTreeMap<String, Value> {
        &self.slots
    }

    pub fn error(&self) -> Option<&StepFailure> {
        self.error.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Merge a step's patch.
    ///
    /// The whole patch is checked before anything is written, so a rejected
    /// patch leaves the state untouched.
    ///
    /// # Errors
    /// [`EngineError::InternalInvariantViolation`] if the patch targets the
    /// reserved `error` slot or a slot that already holds a value.
    pub fn merge(&mut self, writer: &str, patch: Patch) -> Result<(), EngineError> {
        for slot in patch.slot_names() {
            if slot == slots::ERROR {
                return Err(EngineError::InternalInvariantViolation(format!(
                    "step '{writer}' wrote the reserved '{}' slot",
                    slots::ERROR
                )));
            }
            if self.slots.contains_key(slot) {
                return Err(EngineError::InternalInvariantViolation(format!(
                    "step '{writer}' overwrote populated slot '{slot}'"
                )));
            }
        }
        self.slots.extend(patch.into_slots());
        Ok(())
    }

    /// Record a failure into the `error` slot unless one is already there.
    ///
    /// Returns `true` if this failure became the run's error.
    pub fn record_failure(&mut self, failure: StepFailure) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.error = Some(failure);
        true
    }

    /// Read-only view of the slots `descriptor` declares as inputs.
    pub fn snapshot_for(&self, descriptor: &StepDescriptor) -> Snapshot {
        let slots = descriptor
            .all_inputs()
            .filter_map(|slot| self.slots.get(slot).map(|v| (slot.clone(), v.clone())))
            .collect();
        descriptor
            .all_inputs()
            .filter_map(|slot| self.blobs.get(slot).map(|b| (slot, b)))
            .fold(Snapshot::new(slots), |snap, (slot, bytes)| {
                snap.with_blob(slot.clone(), Arc::clone(bytes))
            })
    }

    /// Consume the state into its slots and recorded failure. Blobs are
    /// dropped.
    pub fn into_slots(self) -> (BTreeMap<String, Value>, Option<StepFailure>) {
        (self.slots, self.error)
    }
}
