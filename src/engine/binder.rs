// src/engine/binder.rs

//! Data-flow input binding.
//!
//! A node's `inputs` parameter is the list of upstream values, one per link
//! terminating at the node, in the order the links were registered. That order
//! is not a canvas or topological order. Port capacity is declared here but
//! enforced by whoever owns the graph.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::engine::ExecutionResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRef {
    pub cell_id: String,
    pub port: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub from: PortRef,
    pub to: PortRef,
}

impl Link {
    pub fn new(from_cell: &str, from_port: &str, to_cell: &str, to_port: &str) -> Self {
        Self {
            from: PortRef {
                cell_id: from_cell.to_string(),
                port: from_port.to_string(),
            },
            to: PortRef {
                cell_id: to_cell.to_string(),
                port: to_port.to_string(),
            },
        }
    }
}

/// Input port declaration. Capacity bounds the number of incoming links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDef {
    pub id: String,
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl PortDef {
    pub fn capacity(&self) -> usize {
        self.capacity.unwrap_or(1)
    }

    /// Whether a port already holding `current` links can take one more.
    pub fn accepts(&self, current: usize) -> bool {
        current < self.capacity()
    }
}

/// Last known output of each node.
#[derive(Debug, Clone, Default)]
pub struct NodeOutputs {
    values: HashMap<String, Value>,
}

impl NodeOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what a run produced for downstream use.
    ///
    /// The captured value wins; otherwise trimmed stdout is passed along as a
    /// string. Failed runs leave the previous output untouched.
    pub fn record(&mut self, node_id: &str, result: &ExecutionResult) {
        let value = match result {
            ExecutionResult::Success { .. } => match result.value() {
                Some(v) => v.clone(),
                None => Value::String(result.stdout().unwrap_or_default().trim().to_string()),
            },
            ExecutionResult::Failure { .. } => return,
        };
        self.values.insert(node_id.to_string(), value);
    }

    pub fn insert(&mut self, node_id: &str, value: Value) {
        self.values.insert(node_id.to_string(), value);
    }

    pub fn get(&self, node_id: &str) -> Option<&Value> {
        self.values.get(node_id)
    }
}

/// Upstream values for `target`, one per incoming link, in link order.
///
/// A link whose source has no recorded output contributes `null` so positions
/// stay aligned with links.
pub fn collect_inputs(target: &str, links: &[Link], outputs: &NodeOutputs) -> Vec<Value> {
    links
        .iter()
        .filter(|l| l.to.cell_id == target)
        .map(|l| outputs.get(&l.from.cell_id).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Store `inputs` into the parameters object, unchanged.
pub fn bind_inputs(params: &mut Map<String, Value>, inputs: Vec<Value>) {
    params.insert("inputs".to_string(), Value::Array(inputs));
}
