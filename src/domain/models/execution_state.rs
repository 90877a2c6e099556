//! Per-attempt execution metadata.
//!
//! Holds paths, ports, branch names and per-phase outputs. Coordination
//! fields (status, current phase) belong to the coordination store only and
//! are rejected here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::phase::PhaseName;
use super::phase_output::PhaseOutput;

/// Top-level keys that would duplicate coordination state.
pub const RESERVED_KEYS: [&str; 3] = ["status", "currentPhase", "current_phase"];

/// Key under which per-phase outputs are nested.
pub const OUTPUTS_KEY: &str = "outputs";

/// Shared key/value document owned by one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub attempt_id: Uuid,
    pub parent_target: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    pub fn new(attempt_id: Uuid, parent_target: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            attempt_id,
            parent_target: parent_target.into(),
            fields: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// First reserved key present in `fields`, if any.
    pub fn reserved_key(&self) -> Option<&'static str> {
        reserved_key_in(&self.fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether `key` exists and is not null.
    pub fn has_field(&self, key: &str) -> bool {
        self.fields.get(key).is_some_and(|v| !v.is_null())
    }

    /// Shallow merge. A `null` in the patch removes the key.
    pub fn merge(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            if value.is_null() {
                self.fields.remove(&key);
            } else {
                self.fields.insert(key, value);
            }
        }
        self.updated_at = Utc::now();
    }

    pub fn output(&self, phase: PhaseName) -> Option<PhaseOutput> {
        self.fields
            .get(OUTPUTS_KEY)
            .and_then(|outputs| outputs.get(phase.as_str()))
            .and_then(|raw| serde_json::from_value(raw.clone()).ok())
    }

    pub fn set_output(&mut self, output: &PhaseOutput) {
        let outputs = self
            .fields
            .entry(OUTPUTS_KEY.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !outputs.is_object() {
            *outputs = Value::Object(Map::new());
        }
        if let Value::Object(map) = outputs {
            map.insert(output.phase().as_str().to_string(), output.to_value());
        }
        self.updated_at = Utc::now();
    }

    /// Drop a phase's output. Returns whether one was present.
    pub fn clear_output(&mut self, phase: PhaseName) -> bool {
        let removed = match self.fields.get_mut(OUTPUTS_KEY) {
            Some(Value::Object(map)) => map.remove(phase.as_str()).is_some(),
            _ => false,
        };
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }
}

/// First reserved key present at the top level of `fields`.
pub fn reserved_key_in(fields: &Map<String, Value>) -> Option<&'static str> {
    RESERVED_KEYS.iter().copied().find(|key| fields.contains_key(*key))
}
