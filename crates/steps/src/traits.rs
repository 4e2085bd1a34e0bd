//! The `Step` trait — the contract every pipeline step must fulfil — and the
//! two values that cross it: the read-only [`Snapshot`] a step receives and
//! the [`Patch`] it returns.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::StepError;

/// Read-only view of the slots a step declared as inputs.
///
/// Built by the engine from the run's state container right before dispatch.
/// Slots the step did not declare are never visible here. A slot may carry a
/// shared binary blob next to its JSON value; the blob is handed out by
/// reference count, never copied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    slots: BTreeMap<String, Value>,
    blobs: BTreeMap<String, Arc<[u8]>>,
}

impl Snapshot {
    pub fn new(slots: BTreeMap<String, Value>) -> Self {
        Self {
            slots,
            blobs: BTreeMap::new(),
        }
    }

    /// Attach the blob that travels with `slot`.
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

    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Borrow a slot that must be present.
    pub fn require(&self, slot: &str) -> Result<&Value, StepError> {
        self.get(slot)
            .ok_or_else(|| StepError::MissingInput(slot.to_owned()))
    }

    /// Decode a required slot into `T`.
    pub fn decode<T: DeserializeOwned>(&self, slot: &str) -> Result<T, StepError> {
        let value = self.require(slot)?;
        serde_json::from_value(value.clone()).map_err(|e| StepError::MalformedSlot {
            slot: slot.to_owned(),
            message: e.to_string(),
        })
    }

    /// Decode a slot the step tolerates being absent.
    pub fn decode_optional<T: DeserializeOwned>(&self, slot: &str) -> Result<Option<T>, StepError> {
        if self.contains(slot) {
            self.decode(slot).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Partial state update returned by a successful step: slot name → value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    slots: BTreeMap<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a raw JSON value.
    pub fn with(mut self, slot: impl Into<String>, value: Value) -> Self {
        self.slots.insert(slot.into(), value);
        self
    }

    /// Serialize `value` into `slot`.
    pub fn with_serialized<T: Serialize>(
        self,
        slot: impl Into<String>,
        value: &T,
    ) -> Result<Self, StepError> {
        let slot = slot.into();
        let json = serde_json::to_value(value).map_err(|e| StepError::MalformedSlot {
            slot: slot.clone(),
            message: e.to_string(),
        })?;
        Ok(self.with(slot, json))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn get(&self, slot: &str) -> Option<&Value> {
        self.slots.get(slot)
    }

    pub fn into_slots(self) -> BTreeMap<String, Value> {
        self.slots
    }
}

/// The core step trait.
///
/// A step is a pure function of its snapshot: it never touches shared state,
/// it only returns a patch (or a failure) for the executor to merge.
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, snapshot: &Snapshot) -> Result<Patch, StepError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        accepted: bool,
    }

    fn snapshot(pairs: &[(&str, Value)]) -> Snapshot {
        Snapshot::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn require_reports_missing_slot_by_name() {
        let snap = snapshot(&[]);
        assert_eq!(
            snap.require("classification"),
            Err(StepError::MissingInput("classification".into()))
        );
    }

    #[test]
    fn decode_reads_typed_value() {
        let snap = snapshot(&[("certification", json!({ "accepted": true }))]);
        let verdict: Verdict = snap.decode("certification").unwrap();
        assert_eq!(verdict, Verdict { accepted: true });
    }

    #[test]
    fn decode_flags_malformed_slot() {
        let snap = snapshot(&[("certification", json!("yes"))]);
        let err = snap.decode::<Verdict>("certification").unwrap_err();
        assert!(matches!(err, StepError::MalformedSlot { slot, .. } if slot == "certification"));
    }

    #[test]
    fn decode_optional_tolerates_absence() {
        let snap = snapshot(&[]);
        assert_eq!(snap.decode_optional::<Verdict>("certification").unwrap(), None);
    }

    #[test]
    fn blobs_are_shared_not_copied() {
        let bytes: Arc<[u8]> = Arc::from(vec![1u8, 2, 3]);
        let snap = snapshot(&[("input", json!({}))]).with_blob("input", Arc::clone(&bytes));
        let seen = snap.blob("input").unwrap();
        assert!(Arc::ptr_eq(seen, &bytes));
        assert!(snap.blob("classification").is_none());
    }

    #[test]
    fn patch_builder_collects_slots() {
        let patch = Patch::new()
            .with("narration", json!("/audios/a.wav"))
            .with_serialized("derivedImage", &"synthetic://x")
            .unwrap();
        assert_eq!(patch.len(), 2);
        assert_eq!(patch.get("derivedImage"), Some(&json!("synthetic://x")));
        assert_eq!(
            patch.slot_names().collect::<Vec<_>>(),
            vec!["derivedImage", "narration"]
        );
    }
}
