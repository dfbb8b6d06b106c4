//! Output formatting for qflowctl
//!
//! Supports two output formats:
//! - JSON: one object per record, payloads embedded as JSON when they parse
//! - Text: `<time> <topic> q=<queue_seq> t=<topic_seq> <payload>`

use std::io::Write;

use anyhow::Result;
use chrono::SecondsFormat;
use qflow_core::TopicRecord;
use qflow_storage::time::datetime_from_nanos;
use qflow_storage::topic_map::hex_topic_string;
use serde::Serialize;

use crate::config::OutputFormat;

/// JSON shape of one printed record
#[derive(Debug, Serialize)]
pub struct RecordLine {
    pub timestamp: i64,
    pub time: String,
    pub topic_id: u64,
    pub queue_seq: Option<i64>,
    pub topic_seq: Option<i64>,
    pub data: serde_json::Value,
}

impl From<&TopicRecord> for RecordLine {
    fn from(record: &TopicRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            time: format_time(record.timestamp),
            topic_id: record.topic_id,
            queue_seq: record.queue_seq,
            topic_seq: record.topic_seq,
            data: payload_value(&record.data),
        }
    }
}

/// RFC 3339 with nanoseconds, always UTC
pub fn format_time(timestamp: i64) -> String {
    datetime_from_nanos(timestamp).to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn payload_value(data: &[u8]) -> serde_json::Value {
    match serde_json::from_slice(data) {
        Ok(value) => value,
        Err(_) => serde_json::Value::String(String::from_utf8_lossy(data).into_owned()),
    }
}

fn optional(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Write one record in `format`.
pub fn write_record(
    out: &mut dyn Write,
    format: OutputFormat,
    record: &TopicRecord,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &RecordLine::from(record))?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            writeln!(
                out,
                "{} {} q={} t={} {}",
                format_time(record.timestamp),
                hex_topic_string(record.topic_id),
                optional(record.queue_seq),
                optional(record.topic_seq),
                String::from_utf8_lossy(&record.data)
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(format: OutputFormat, record: &TopicRecord) -> String {
        let mut out = Vec::new();
        write_record(&mut out, format, record).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(1_513_848_255_372_063_000), "2017-12-21T09:24:15.372063000Z");
        assert_eq!(format_time(0), "1970-01-01T00:00:00.000000000Z");
    }

    #[test]
    fn test_json_line_embeds_json_payload() {
        let record = TopicRecord::new(Some(1), 3, Some(0), 0, r#"{"px": 101.5}"#);
        let rendered = render(OutputFormat::Json, &record);
        let line: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(line["data"], json!({"px": 101.5}));
        assert_eq!(line["topic_id"], json!(3));
        assert_eq!(line["queue_seq"], json!(1));
    }

    #[test]
    fn test_json_line_keeps_text_payload() {
        let record = TopicRecord::new(None, 3, None, 0, "record-1");
        let rendered = render(OutputFormat::Json, &record);
        let line: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(line["data"], json!("record-1"));
        assert!(line["queue_seq"].is_null());
    }

    #[test]
    fn test_text_line() {
        let record = TopicRecord::new(None, 3, Some(7), 0, "record-1");
        assert_eq!(
            render(OutputFormat::Text, &record),
            "1970-01-01T00:00:00.000000000Z 0x0000000000000003 q=- t=7 record-1\n"
        );
    }
}
