// src/data_types.rs
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Largest integer a JSON consumer can hold exactly in an f64.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// One uploaded file as it arrives from the user.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Upload {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

/// A cell after type inference.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Boolean(bool),
    Number(f64),
    Date(DateTime<Utc>),
    String(String),
}

impl CellValue {
    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Boolean(b) => Value::Bool(*b),
            CellValue::Number(n) => number_to_json(*n),
            CellValue::Date(d) => Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            CellValue::String(s) => Value::String(s.clone()),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        // Non-finite values never reach here; inference keeps them as strings.
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

/// Verbatim cell text for one record, positionally aligned with the column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow(pub Vec<String>);

/// Inferred cell values for one record, positionally aligned with the column list.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRow(pub Vec<CellValue>);

/// A successfully parsed upload: one column list shared by a raw and a typed table.
///
/// Row `i` of `raw_rows` and row `i` of `typed_rows` describe the same record.
/// A dataset is never edited in place; a new upload replaces it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    raw_rows: Vec<RawRow>,
    typed_rows: Vec<TypedRow>,
}

impl Dataset {
    /// Callers must hand in aligned tables; `CsvHandler` is the only producer.
    pub(crate) fn new(columns: Vec<String>, raw_rows: Vec<RawRow>, typed_rows: Vec<TypedRow>) -> Self {
        debug_assert_eq!(raw_rows.len(), typed_rows.len());
        Dataset {
            columns,
            raw_rows,
            typed_rows,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn raw_rows(&self) -> &[RawRow] {
        &self.raw_rows
    }

    pub fn typed_rows(&self) -> &[TypedRow] {
        &self.typed_rows
    }

    pub fn row_count(&self) -> usize {
        self.raw_rows.len()
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn raw_value(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.raw_rows.get(row)?.0.get(idx).map(String::as_str)
    }

    pub fn typed_value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let idx = self.column_index(column)?;
        self.typed_rows.get(row)?.0.get(idx)
    }

    /// First `limit` raw rows, for a quick look at the upload.
    pub fn preview(&self, limit: usize) -> &[RawRow] {
        &self.raw_rows[..limit.min(self.raw_rows.len())]
    }

    /// Typed rows as JSON objects keyed by column, in column order.
    pub fn typed_records(&self) -> Vec<Value> {
        typed_records(&self.columns, &self.typed_rows)
    }
}

pub fn typed_records(columns: &[String], rows: &[TypedRow]) -> Vec<Value> {
    rows.iter()
        .map(|row| {
            let record: Map<String, Value> = columns
                .iter()
                .cloned()
                .zip(row.0.iter().map(CellValue::to_json))
                .collect();
            Value::Object(record)
        })
        .collect()
}
