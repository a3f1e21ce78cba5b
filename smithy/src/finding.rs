use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;

/// Store-assigned identifier of a persisted finding.
pub type FindingId = u64;

/// Identifier of a single pipeline run. Every store operation is scoped by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for InstanceId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque details payload of a vulnerability finding.
///
/// The runtime never interprets the body beyond the minimal shape checked by
/// [`Finding::validate`]; its canonical serialized form is the JSON object itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Finding(Value);

impl Finding {
    pub fn new(details: Value) -> Self {
        Self(details)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn as_value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Finding uid as reported by the producing tool (`finding_info.uid`).
    pub fn uid(&self) -> Option<&str> {
        self.0
            .get("finding_info")
            .and_then(|info| info.get("uid"))
            .and_then(Value::as_str)
    }

    /// Canonical JSON representation handed to reporters.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }

    /// Rejects payloads missing the fields every backend relies on: the body must
    /// be a JSON object with a `finding_info` object carrying non-empty `uid` and
    /// `title` strings.
    pub fn validate(&self) -> Result<(), StoreError> {
        let invalid = |reason: &str| StoreError::InvalidFinding {
            reason: reason.to_string(),
        };

        let body = self.0.as_object().ok_or_else(|| invalid("finding must be a JSON object"))?;
        let info = body
            .get("finding_info")
            .and_then(Value::as_object)
            .ok_or_else(|| invalid("missing 'finding_info' object"))?;

        for field in ["uid", "title"] {
            match info.get(field).and_then(Value::as_str) {
                Some(s) if !s.trim().is_empty() => {}
                _ => return Err(invalid(&format!("'finding_info.{field}' cannot be empty"))),
            }
        }

        Ok(())
    }
}

impl From<Value> for Finding {
    fn from(details: Value) -> Self {
        Self(details)
    }
}

/// A finding as held by the store: its identifier plus the details payload.
///
/// `id` is `None` only for findings an enricher created that have not been
/// persisted yet; everything read back from a store carries one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityFinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FindingId>,
    pub finding: Finding,
}

impl VulnerabilityFinding {
    pub fn new(id: FindingId, finding: Finding) -> Self {
        Self {
            id: Some(id),
            finding,
        }
    }

    /// A finding not yet known to the store; `update` appends it.
    pub fn unsaved(finding: Finding) -> Self {
        Self { id: None, finding }
    }
}
