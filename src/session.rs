//! Snapshot of an executed notebook session's rendered outputs
//!
//! The pipeline only ever reads a [`SessionView`]. Markup normalization works on a
//! deep copy (see [`crate::normalize`]), so the caller's view is observably unchanged
//! after a capture run.

use crate::mime::MIMEBUNDLE_TYPE;
use serde::{Deserialize, Serialize};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Opaque, stable cell identifier.
pub type CellId = String;

/// Per-cell outputs plus the notebook's authoritative cell ordering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    /// In session order, which is the capture order for cells missing from `cell_ids`.
    #[serde(default)]
    pub cell_notifications: IndexMap<CellId, CellNotification>,
    /// Cell ids in notebook order, when known.
    #[serde(default)]
    pub cell_ids: Option<Vec<CellId>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellNotification {
    pub cell_id: CellId,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub output: Option<CellOutput>,
    #[serde(default)]
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellOutput {
    #[serde(default = "default_channel")]
    pub channel: String,
    pub mimetype: String,
    #[serde(default)]
    pub data: Value,
}

fn default_channel() -> String {
    "output".to_string()
}

impl SessionView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the output of a cell.
    pub fn set_output(&mut self, cell_id: &str, mimetype: &str, data: Value) {
        self.cell_notifications.insert(
            cell_id.to_string(),
            CellNotification {
                cell_id: cell_id.to_string(),
                status: "idle".to_string(),
                output: Some(CellOutput {
                    channel: default_channel(),
                    mimetype: mimetype.to_string(),
                    data,
                }),
                timestamp: 0.0,
            },
        );
    }

    pub fn set_cell_ids<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<CellId>,
    {
        self.cell_ids = Some(ids.into_iter().map(Into::into).collect());
    }

    pub fn output(&self, cell_id: &str) -> Option<&CellOutput> {
        self.cell_notifications
            .get(cell_id)
            .and_then(|n| n.output.as_ref())
    }
}

/// A cell output decoded into its two possible shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputPayload<'a> {
    Single { mimetype: &'a str, data: &'a Value },
    Bundle(Map<String, Value>),
}

impl<'a> OutputPayload<'a> {
    /// Decode an output, failing closed.
    ///
    /// Returns `None` for empty outputs and for bundles whose payload is neither an
    /// object nor a string that parses as one.
    pub fn decode(output: &'a CellOutput) -> Option<Self> {
        if output.data.is_null() {
            return None;
        }
        if output.mimetype == MIMEBUNDLE_TYPE {
            return load_mimebundle(&output.data).map(OutputPayload::Bundle);
        }
        Some(OutputPayload::Single {
            mimetype: &output.mimetype,
            data: &output.data,
        })
    }
}

/// Parse a MIME bundle payload into a map.
pub fn load_mimebundle(data: &Value) -> Option<Map<String, Value>> {
    match data {
        Value::Object(map) => Some(map.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}
