// src/ui.rs
//! Plain-text presentation of the conversation and the upload preview.

use std::io::{self, Write};

use crate::conversation::Turn;
use crate::data_types::Dataset;

pub const USER_LABEL: &str = "You";
pub const SYSTEM_LABEL: &str = "System";

pub fn speaker(turn: &Turn) -> &'static str {
    if turn.is_user() {
        USER_LABEL
    } else {
        SYSTEM_LABEL
    }
}

/// One line per text turn; chart turns get a header line and their spec as pretty JSON.
pub fn format_turn(turn: &Turn) -> String {
    match turn {
        Turn::UserText(text) | Turn::SystemText(text) => format!("{}: {}", speaker(turn), text),
        Turn::SystemChart(spec) => {
            let body = serde_json::to_string_pretty(spec.as_json())
                .unwrap_or_else(|e| format!("<unprintable chart: {e}>"));
            format!("{}: [chart]\n{}", SYSTEM_LABEL, body)
        }
    }
}

/// Write the header and the first `limit` raw rows, tab separated.
pub fn write_preview<W: Write>(out: W, dataset: &Dataset, limit: usize) -> io::Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(out);
    writer.write_record(dataset.columns())?;
    for row in dataset.preview(limit) {
        writer.write_record(&row.0)?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::chart::ChartBinder;
    use crate::csv_handler::CsvHandler;

    #[test]
    fn text_turns_are_labelled() {
        assert_eq!(format_turn(&Turn::UserText("hi".into())), "You: hi");
        assert_eq!(format_turn(&Turn::SystemText("ok".into())), "System: ok");
    }

    #[test]
    fn chart_turn_prints_spec() {
        let spec = json!({"mark": "bar"}).as_object().cloned().unwrap();
        let bound = ChartBinder::bind(&spec, &[], &[]);
        let text = format_turn(&Turn::SystemChart(Arc::new(bound)));
        assert!(text.starts_with("System: [chart]\n"));
        assert!(text.contains("\"mark\": \"bar\""));
    }

    #[test]
    fn preview_is_limited_and_tab_separated() {
        let ds = CsvHandler::new()
            .ingest("a,b\n1,x\n2,y\n3,z\n", "text/csv")
            .unwrap();
        let mut out = Vec::new();
        write_preview(&mut out, &ds, 2).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a\tb\n1\tx\n2\ty\n");
    }
}
