//! Command handlers for qflowctl
//!
//! - Query: locate archive files and probe them
//! - Read: print records of files or of the archive in timestamp order
//!
//! Handlers write to a caller-supplied `Write` so they can be tested without
//! capturing stdout.

pub mod query;
pub mod read;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use qflow_storage::naming::parse_date;
use qflow_storage::{ArchiveFilter, IntoTimestamp, TopicPattern};

/// Machine, queue and topic selectors shared by several commands
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Machine glob (repeatable, default: all machines)
    #[arg(short, long)]
    pub machine: Vec<String>,

    /// Queue glob (repeatable, default: all queues)
    #[arg(short, long)]
    pub queue: Vec<String>,

    /// Topic glob or numeric topic id (repeatable, default: all topics)
    #[arg(short, long)]
    pub topic: Vec<String>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> ArchiveFilter {
        ArchiveFilter {
            machines: self.machine.clone(),
            queues: self.queue.clone(),
            topics: self.topic.iter().map(|t| parse_topic(t)).collect(),
        }
    }
}

/// A decimal or `0x` hex id selects one topic id; anything else is a glob.
pub fn parse_topic(value: &str) -> TopicPattern {
    let id = match value.strip_prefix("0x") {
        Some(hex) if !hex.is_empty() && hex.len() <= 16 => u64::from_str_radix(hex, 16).ok(),
        Some(_) => None,
        None => value.parse::<u64>().ok(),
    };
    match id {
        Some(id) => TopicPattern::Id(id),
        None => TopicPattern::Name(value.to_string()),
    }
}

/// Parse a point in time: `YYYYMMDD`, RFC 3339, or integer nanoseconds.
pub fn parse_timestamp(value: &str) -> Result<i64> {
    let value = value.trim();
    if let Some(date) = parse_date(value) {
        return Ok(date.into_timestamp());
    }
    if let Ok(nanos) = value.parse::<i64>() {
        return Ok(nanos);
    }
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc).into_timestamp());
    }
    bail!(
        "invalid time {:?}: expected YYYYMMDD, RFC 3339 or nanoseconds since epoch",
        value
    )
}

/// Parse a `YYYYMMDD` archive date.
pub fn parse_archive_date(value: &str) -> Result<NaiveDate> {
    parse_date(value.trim())
        .with_context(|| format!("invalid date {:?}: expected YYYYMMDD", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_forms() {
        assert_eq!(parse_timestamp("19700102").unwrap(), 86_400_000_000_000);
        assert_eq!(
            parse_timestamp("1513848255372063000").unwrap(),
            1_513_848_255_372_063_000
        );
        assert_eq!(
            parse_timestamp("2017-12-21T09:24:15.372063Z").unwrap(),
            1_513_848_255_372_063_000
        );
        assert_eq!(
            parse_timestamp("2017-12-21T17:24:15+08:00").unwrap(),
            1_513_848_255_000_000_000
        );
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_parse_archive_date() {
        assert_eq!(
            parse_archive_date("20171220").unwrap(),
            NaiveDate::from_ymd_opt(2017, 12, 20).unwrap()
        );
        assert!(parse_archive_date("2017-12-20").is_err());
        assert!(parse_archive_date("20171235").is_err());
    }

    #[test]
    fn test_parse_topic() {
        assert_eq!(parse_topic("42"), TopicPattern::Id(42));
        assert_eq!(parse_topic("0x2a"), TopicPattern::Id(42));
        assert_eq!(parse_topic("0x*"), TopicPattern::Name("0x*".to_string()));
        assert_eq!(parse_topic("orders.*"), TopicPattern::Name("orders.*".to_string()));
    }

    #[test]
    fn test_filter_args() {
        let args = FilterArgs {
            machine: vec!["machine-*".to_string()],
            queue: vec![],
            topic: vec!["7".to_string(), "a*".to_string()],
        };
        let filter = args.to_filter();
        assert_eq!(filter.machines, vec!["machine-*"]);
        assert!(filter.queues.is_empty());
        assert_eq!(
            filter.topics,
            vec![TopicPattern::Id(7), TopicPattern::Name("a*".to_string())]
        );
    }
}
