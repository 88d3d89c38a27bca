use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{Datelike, Local};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::Instrument;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

mod config;
mod error;
mod loader;
mod models;
mod notify;
mod pipeline;
mod report;
mod reshape;
mod schema;
mod source;
mod warehouse;

use config::{Config, SourceLocation};
use notify::Notification;
use pipeline::{LoadReport, RunFailure, RunSettings};
use source::{FolderSource, LinkSource, ReportSource};
use warehouse::PgWarehouse;

#[derive(Parser)]
#[command(name = "seesaw-activity-etl")]
#[command(about = "Loads the weekly SeeSaw student activity export into the warehouse", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Append new per-day activity rows (default)
    Daily,
    /// Append the weekly summary counters
    Weekly,
    /// Reshape a local export and print it as CSV without loading
    Preview {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        weekly: bool,
    },
}

#[derive(Debug, Clone, Copy)]
enum Extract {
    Daily,
    Weekly,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Daily) {
        Commands::Daily => load(Extract::Daily).await,
        Commands::Weekly => load(Extract::Weekly).await,
        Commands::Preview { csv, weekly } => preview(&csv, weekly),
    }
}

/// One scheduled run. The operator is notified exactly once, then a failed
/// run still exits non-zero.
async fn load(extract: Extract) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(Some(&config.log_file))?;

    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", job = %config.job_name, %run_id, ?extract);
    let outcome = execute(&config, extract).instrument(span).await;

    let (error, details) = match &outcome {
        Ok(report) => {
            tracing::info!(
                %run_id,
                table = %report.table,
                reshaped = report.reshaped,
                inserted = report.inserted,
                "run complete"
            );
            (None, Some(report.summary.clone()))
        }
        Err(failure) => {
            tracing::error!(%run_id, error = ?failure, "{failure}");
            (Some(failure.to_string()), None)
        }
    };
    let notification = Notification::compose(
        &config.job_name,
        error.as_deref(),
        details.as_deref(),
        Some(&config.log_file),
    );
    let notifier = notify::notifier_for(config.webhook_url.as_deref());
    let notified = notifier.notify(&notification).await;
    if let Err(err) = &notified {
        tracing::error!(error = %err, "could not notify operator");
    }

    let report = outcome.context("activity load did not complete")?;
    notified.context("load succeeded but the operator was not notified")?;
    println!("{}", report.message());
    Ok(())
}

async fn execute(config: &Config, extract: Extract) -> Result<LoadReport, RunFailure> {
    let store = PgWarehouse::connect(&config.database_url).await?;

    let source: Box<dyn ReportSource> = match &config.source {
        SourceLocation::Folder { path, prefix } => Box::new(FolderSource {
            folder: path.clone(),
            prefix: prefix.clone(),
        }),
        SourceLocation::Link(url) => Box::new(LinkSource::new(url.clone())),
    };

    let table = match extract {
        Extract::Daily => config.daily_table.clone(),
        Extract::Weekly => config.weekly_table.clone(),
    };
    let settings = RunSettings {
        table,
        retry: config.retry,
        today: Local::now().date_naive(),
    };

    match extract {
        Extract::Daily => pipeline::run_daily(source.as_ref(), &store, &settings).await,
        Extract::Weekly => pipeline::run_weekly(source.as_ref(), &store, &settings).await,
    }
}

fn preview(csv_path: &Path, weekly: bool) -> anyhow::Result<()> {
    init_tracing(None)?;

    let file = File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let today = Local::now().date_naive();
    let raw = source::parse_report(file, today)?;

    let mut writer = csv::Writer::from_writer(std::io::stdout().lock());
    let rows = if weekly {
        write_rows(&mut writer, &reshape::weekly_summaries(&raw)?)?
    } else {
        write_rows(&mut writer, &reshape::reshape_daily(raw, today.year())?)?
    };
    writer.flush()?;

    tracing::info!(rows, file = %csv_path.display(), "preview written");
    Ok(())
}

fn write_rows<W: Write, R: Serialize>(
    writer: &mut csv::Writer<W>,
    records: &[R],
) -> anyhow::Result<usize> {
    for record in records {
        writer.serialize(record)?;
    }
    Ok(records.len())
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}
