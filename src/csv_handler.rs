// src/csv_handler.rs
use std::collections::HashSet;
use std::io;
use std::path::Path;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use csv::ReaderBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::task;
use tracing::{debug, warn};

use crate::data_types::{CellValue, Dataset, RawRow, TypedRow, Upload};
use crate::error::CsvFormatError;

/// MIME types accepted as comma-separated text. Windows browsers report `.csv`
/// files as `application/vnd.ms-excel`.
const CSV_MIME_TYPES: &[&str] = &[
    "text/csv",
    "application/vnd.ms-excel",
    "application/csv",
    "application/x-csv",
    "text/x-csv",
    "text/comma-separated-values",
];

const FALLBACK_MIME: &str = "application/octet-stream";

static DECIMAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?$").expect("decimal pattern")
});

static RADIX_INTEGER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0(?:[xX][0-9a-fA-F]+|[oO][0-7]+|[bB][01]+)$").expect("radix pattern"));

static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([-+]\d{2})?(\d{4})(?:-(\d{2})(?:-(\d{2}))?)?(?:T(\d{2}):(\d{2})(?::(\d{2})(?:\.(\d{3}))?)?(Z|[-+]\d{2}:\d{2})?)?$",
    )
    .expect("date pattern")
});

pub struct CsvHandler {}

impl Default for CsvHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvHandler {
    pub fn new() -> Self {
        CsvHandler {}
    }

    /// Read a file from disk as an upload, guessing its MIME type from the extension
    /// unless one is supplied.
    pub async fn read_upload<P: AsRef<Path> + Send + 'static>(
        &self,
        path: P,
        mime_type: Option<String>,
    ) -> io::Result<Upload> {
        task::spawn_blocking(move || {
            let path = path.as_ref();
            let bytes = std::fs::read(path)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let mime = mime_type.unwrap_or_else(|| Self::mime_from_extension(path).to_string());
            Ok(Upload::new(name, mime, bytes))
        })
        .await
        .map_err(io::Error::other)?
    }

    pub fn mime_from_extension(path: &Path) -> &'static str {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => "text/csv",
            _ => FALLBACK_MIME,
        }
    }

    /// Whether `mime_type` names a CSV-family type. Parameters and case are ignored.
    pub fn is_csv_mime(mime_type: &str) -> bool {
        let essence = mime_type.split(';').next().unwrap_or("").trim();
        CSV_MIME_TYPES
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(essence))
    }

    /// Ingest uploaded bytes. Invalid UTF-8 sequences are replaced rather than rejected.
    pub fn ingest_upload(&self, upload: &Upload) -> Result<Dataset, CsvFormatError> {
        if !Self::is_csv_mime(&upload.mime_type) {
            return Err(CsvFormatError::unsupported_type(&upload.mime_type));
        }
        let text = String::from_utf8_lossy(&upload.bytes);
        self.ingest(&text, &upload.mime_type)
    }

    /// Parse CSV text into a dataset holding the verbatim and the type-inferred table.
    pub fn ingest(&self, text: &str, mime_type: &str) -> Result<Dataset, CsvFormatError> {
        if !Self::is_csv_mime(mime_type) {
            debug!(mime_type, "rejected upload with non-CSV type");
            return Err(CsvFormatError::unsupported_type(mime_type));
        }

        let (columns, raw_rows) = match Self::parse_records(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "CSV parse failed");
                return Err(e);
            }
        };

        let typed_rows: Vec<TypedRow> = raw_rows
            .iter()
            .map(|row| TypedRow(row.0.iter().map(|cell| infer_cell(cell)).collect()))
            .collect();

        debug!(columns = columns.len(), rows = raw_rows.len(), "CSV ingested");
        Ok(Dataset::new(columns, raw_rows, typed_rows))
    }

    fn parse_records(text: &str) -> Result<(Vec<String>, Vec<RawRow>), CsvFormatError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut reader = ReaderBuilder::new()
            .delimiter(b',')
            .has_headers(true)
            .flexible(false)
            .from_reader(text.as_bytes());

        let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        if columns.is_empty() {
            return Err(CsvFormatError::parse_failure("no header row"));
        }

        let mut seen = HashSet::with_capacity(columns.len());
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(CsvFormatError::parse_failure(format!(
                "duplicate column name {dup:?}"
            )));
        }

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            rows.push(RawRow(record.iter().map(String::from).collect()));
        }

        Ok((columns, rows))
    }
}

/// Infer a typed value for one cell.
///
/// Rules apply to the trimmed text in order: empty, boolean literal, number,
/// ISO date. Anything else keeps its original, untrimmed text.
pub fn infer_cell(raw: &str) -> CellValue {
    let value = raw.trim();
    if value.is_empty() {
        return CellValue::Null;
    }
    match value {
        "true" => return CellValue::Boolean(true),
        "false" => return CellValue::Boolean(false),
        _ => {}
    }
    if let Some(n) = parse_number(value) {
        return CellValue::Number(n);
    }
    if let Some(d) = parse_date(value) {
        return CellValue::Date(d);
    }
    CellValue::String(raw.to_string())
}

fn parse_number(value: &str) -> Option<f64> {
    if DECIMAL.is_match(value) {
        return value.parse::<f64>().ok().filter(|n| n.is_finite());
    }
    if RADIX_INTEGER.is_match(value) {
        let radix = match value.as_bytes()[1] {
            b'x' | b'X' => 16,
            b'o' | b'O' => 8,
            _ => 2,
        };
        return u64::from_str_radix(&value[2..], radix).ok().map(|n| n as f64);
    }
    None
}

fn parse_date(value: &str) -> Option<chrono::DateTime<Utc>> {
    let caps = ISO_DATE.captures(value)?;
    let field = |i: usize| caps.get(i).map(|m| m.as_str());
    let num = |i: usize, default: u32| -> Option<u32> {
        field(i).map_or(Some(default), |s| s.parse().ok())
    };

    let year: i32 = match field(1) {
        Some(prefix) => format!("{prefix}{}", field(2)?).parse().ok()?,
        None => field(2)?.parse().ok()?,
    };
    let date = NaiveDate::from_ymd_opt(year, num(3, 1)?, num(4, 1)?)?;
    let time = NaiveTime::from_hms_milli_opt(num(5, 0)?, num(6, 0)?, num(7, 0)?, num(8, 0)?)?;
    let local = NaiveDateTime::new(date, time);

    match field(9) {
        None | Some("Z") => Some(Utc.from_utc_datetime(&local)),
        Some(offset) => {
            let sign = if offset.starts_with('-') { -1 } else { 1 };
            let hours: i32 = offset[1..3].parse().ok()?;
            let minutes: i32 = offset[4..6].parse().ok()?;
            let offset = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))?;
            let at = offset.from_local_datetime(&local).single()?;
            Some(at.with_timezone(&Utc))
        }
    }
}
