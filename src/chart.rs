// src/chart.rs
//! Binding partial chart specifications to the local dataset.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::data_types::{typed_records, TypedRow};

/// A chart specification as returned by the inference service: marks and
/// encodings, no data of its own.
pub type ChartSpec = Map<String, Value>;

/// A specification carrying its data inline, ready for a renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RenderableSpec(Value);

impl RenderableSpec {
    pub fn as_json(&self) -> &Value {
        &self.0
    }

    /// The inline data values, if the spec carries any.
    pub fn values(&self) -> Option<&[Value]> {
        self.0
            .get("data")?
            .get("values")?
            .as_array()
            .map(Vec::as_slice)
    }
}

pub struct ChartBinder;

impl ChartBinder {
    /// Copy `spec`, replacing its `data` field with the typed rows as inline values.
    ///
    /// Any `data` the service sent (urls, named sources, formats) is dropped.
    /// Nothing else is checked; a malformed spec fails later, in the renderer.
    pub fn bind(spec: &ChartSpec, columns: &[String], rows: &[TypedRow]) -> RenderableSpec {
        let mut bound = spec.clone();
        bound.insert(
            "data".to_string(),
            json!({ "values": typed_records(columns, rows) }),
        );
        RenderableSpec(Value::Object(bound))
    }
}
