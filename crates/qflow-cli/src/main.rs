//! qflow CLI (qflowctl)
//!
//! Command-line tool for inspecting and replaying a qflow archive.
//!
//! ## Overview
//!
//! `qflowctl` works directly on archive files, locally or in S3:
//! - **query**: list the readable files of one day
//! - **cat**: print the records of explicit files in timestamp order
//! - **replay**: print the archive from a point in time, merged across files
//! - **first-timestamp**: probe files and explain why one is unreadable
//! - **inspect**: decompose an archive path into machine, date, topic and queue
//!
//! ## Quick Start
//!
//! ```bash
//! export QFLOW_ROOT=s3://market-data/flow
//!
//! # Which files did machine-1 write on 2017-12-20?
//! qflowctl query --date 20171220 --machine machine-1
//!
//! # Replay one topic from 09:30 UTC, first 100 records
//! qflowctl replay --from 2017-12-20T09:30:00Z --topic 'orders.*' --limit 100
//!
//! # Print two files as text
//! qflowctl --format text cat a.default.20171220-000000Z.gz b.default.20171220-000000Z.gz
//! ```
//!
//! ## Configuration
//!
//! `~/.qflow/config.toml` (or `--config FILE`) provides defaults; see
//! [`config`]. `--root`/`QFLOW_ROOT` and `--format` override it. Log verbosity
//! follows `RUST_LOG` (default `info`); logs go to stderr, records to stdout.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod format;

use commands::{parse_archive_date, FilterArgs};
use config::{Config, OutputFormat};

#[derive(Parser)]
#[command(name = "qflowctl")]
#[command(about = "qflow archive command-line tool", long_about = None)]
struct Cli {
    /// Archive root directory (local path or s3://bucket/prefix)
    #[arg(short, long, env = "QFLOW_ROOT")]
    root: Option<String>,

    /// Config file (default: ~/.qflow/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Record output format
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List archive files of one day
    Query {
        /// Archive date (YYYYMMDD)
        #[arg(short, long)]
        date: String,

        #[command(flatten)]
        filter: FilterArgs,

        /// Order by first record instead of by path
        #[arg(long)]
        by_time: bool,
    },
    /// Print records of explicit files in timestamp order
    Cat {
        /// Archive files
        #[arg(required = true)]
        files: Vec<String>,

        /// Skip records before this time (YYYYMMDD, RFC 3339 or nanoseconds)
        #[arg(long)]
        from: Option<String>,
    },
    /// Replay the archive from a point in time
    Replay {
        /// Start time (YYYYMMDD, RFC 3339 or nanoseconds)
        #[arg(long)]
        from: String,

        #[command(flatten)]
        filter: FilterArgs,

        /// Stop after this many records
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print the first timestamp of each file
    FirstTimestamp {
        /// Archive files
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Decompose an archive path
    Inspect {
        /// Archive file path
        path: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?.with_overrides(cli.root, cli.format)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Query {
            date,
            filter,
            by_time,
        } => {
            let date = parse_archive_date(&date)?;
            commands::query::handle_query(&config, date, &filter.to_filter(), by_time, &mut out)?;
        }
        Commands::Cat { files, from } => {
            commands::read::handle_cat(&files, from.as_deref(), config.output_format, &mut out)?;
        }
        Commands::Replay {
            from,
            filter,
            limit,
        } => {
            commands::read::handle_replay(&config, &from, &filter, limit, &mut out)?;
        }
        Commands::FirstTimestamp { files } => {
            commands::query::handle_first_timestamp(&config, &files, &mut out)?;
        }
        Commands::Inspect { path } => {
            commands::query::handle_inspect(&path, config.output_format, &mut out)?;
        }
    }

    out.flush()?;
    Ok(())
}
