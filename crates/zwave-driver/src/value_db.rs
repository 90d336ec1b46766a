//! The value store.
//!
//! Values are keyed by the raw tuple `(node, endpoint, cc, property,
//! property key)`. Metadata is stored separately so a value can be removed
//! while its schema survives. Setting an unchanged value emits nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The key of one value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueId {
    pub node_id: u8,
    pub endpoint: u8,
    pub cc: u8,
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_key: Option<String>,
}

impl ValueId {
    pub fn new(node_id: u8, endpoint: u8, cc: u8, property: &str) -> Self {
        Self {
            node_id,
            endpoint,
            cc,
            property: property.to_string(),
            property_key: None,
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.property_key = Some(key.to_string());
        self
    }
}

/// A stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Number(i64),
    String(String),
    Buffer(Vec<u8>),
    /// A duration in its wire encoding (see `zwave_cc::Duration`).
    Duration(u8),
}

/// The declared type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Boolean,
    Number,
    String,
    Buffer,
    Duration,
}

/// Schema and UI hints for a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueMetadata {
    pub kind: ValueKind,
    pub readable: bool,
    pub writable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Stateful values are persisted across sessions; volatile ones are
    /// re-read during the Dynamic interview stage.
    pub stateful: bool,
}

impl ValueMetadata {
    pub fn readonly(kind: ValueKind) -> Self {
        Self {
            kind,
            readable: true,
            writable: false,
            min: None,
            max: None,
            label: None,
            unit: None,
            stateful: true,
        }
    }

    pub fn readwrite(kind: ValueKind) -> Self {
        Self {
            writable: true,
            ..Self::readonly(kind)
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn volatile(mut self) -> Self {
        self.stateful = false;
        self
    }
}

/// Change notifications produced by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueEvent {
    Updated {
        id: ValueId,
        prev: Option<Value>,
        value: Value,
    },
    Removed {
        id: ValueId,
        prev: Value,
    },
    /// A stateless notification-style value (never stored).
    Notification {
        id: ValueId,
        value: Value,
    },
    MetadataUpdated {
        id: ValueId,
    },
}

/// The authoritative value store. Mutated only by the driver task.
#[derive(Debug, Default)]
pub struct ValueDB {
    values: BTreeMap<ValueId, Value>,
    metadata: BTreeMap<ValueId, ValueMetadata>,
}

impl ValueDB {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ValueId) -> Option<&Value> {
        self.values.get(id)
    }

    pub fn has(&self, id: &ValueId) -> bool {
        self.values.contains_key(id)
    }

    /// Store a value. Returns the change event, or `None` when the stored
    /// value was already equal.
    pub fn set(&mut self, id: ValueId, value: Value) -> Option<ValueEvent> {
        match self.values.get(&id) {
            Some(existing) if *existing == value => None,
            _ => {
                let prev = self.values.insert(id.clone(), value.clone());
                Some(ValueEvent::Updated { id, prev, value })
            }
        }
    }

    /// Remove a value, keeping its metadata.
    pub fn remove(&mut self, id: &ValueId) -> Option<ValueEvent> {
        self.values.remove(id).map(|prev| ValueEvent::Removed {
            id: id.clone(),
            prev,
        })
    }

    pub fn set_metadata(&mut self, id: ValueId, metadata: ValueMetadata) -> Option<ValueEvent> {
        match self.metadata.get(&id) {
            Some(existing) if *existing == metadata => None,
            _ => {
                self.metadata.insert(id.clone(), metadata);
                Some(ValueEvent::MetadataUpdated { id })
            }
        }
    }

    pub fn metadata(&self, id: &ValueId) -> Option<&ValueMetadata> {
        self.metadata.get(id)
    }

    /// Whether a value id is flagged stateful (defaults to true when no
    /// metadata exists).
    pub fn is_stateful(&self, id: &ValueId) -> bool {
        self.metadata.get(id).map_or(true, |m| m.stateful)
    }

    /// All stored values for a node, for persistence or removal.
    pub fn values_for_node(&self, node_id: u8) -> Vec<(&ValueId, &Value)> {
        self.values
            .iter()
            .filter(|(id, _)| id.node_id == node_id)
            .collect()
    }

    /// Drop every value and metadata entry of a node. Returns the removal
    /// events.
    pub fn remove_node(&mut self, node_id: u8) -> Vec<ValueEvent> {
        let ids: Vec<ValueId> = self
            .values
            .keys()
            .filter(|id| id.node_id == node_id)
            .cloned()
            .collect();
        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(event) = self.remove(&id) {
                events.push(event);
            }
        }
        self.metadata.retain(|id, _| id.node_id != node_id);
        events
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
