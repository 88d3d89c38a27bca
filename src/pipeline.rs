use std::fmt;

use chrono::{Datelike, NaiveDate};

use crate::error::EtlError;
use crate::loader;
use crate::models::RawTable;
use crate::report::{self, SchoolActivity};
use crate::reshape;
use crate::source::{self, ReportSource, RetryPolicy};
use crate::warehouse::{TableRef, Warehouse};

/// Steps a run has completed, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Fetched,
    Reshaped,
    WatermarkRead,
    Filtered,
    Appended,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Fetched => "fetched",
            RunStage::Reshaped => "reshaped",
            RunStage::WatermarkRead => "watermark read",
            RunStage::Filtered => "filtered",
            RunStage::Appended => "appended",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct RunFailure {
    /// Last stage reached before the error; `None` if nothing completed.
    pub reached: Option<RunStage>,
    pub error: EtlError,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reached {
            Some(stage) => write!(f, "run failed after stage '{stage}': {}", self.error),
            None => write!(f, "run failed while fetching or reading the report: {}", self.error),
        }
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<EtlError> for RunFailure {
    fn from(error: EtlError) -> Self {
        Self {
            reached: None,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub table: TableRef,
    pub watermark: Option<NaiveDate>,
    pub reshaped: usize,
    pub inserted: u64,
    pub summary: String,
}

impl LoadReport {
    pub fn message(&self) -> String {
        report::inserted_message(self.inserted)
    }
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub table: TableRef,
    pub retry: RetryPolicy,
    /// Extract date; its year also dates the per-day columns.
    pub today: NaiveDate,
}

#[derive(Debug, Default)]
struct Progress {
    reached: Option<RunStage>,
}

impl Progress {
    fn advance(&mut self, stage: RunStage) {
        tracing::info!(%stage, "stage complete");
        self.reached = Some(stage);
    }

    fn fail(&self, error: EtlError) -> RunFailure {
        RunFailure {
            reached: self.reached,
            error,
        }
    }
}

pub async fn run_daily(
    source: &dyn ReportSource,
    store: &dyn Warehouse,
    settings: &RunSettings,
) -> Result<LoadReport, RunFailure> {
    let year = settings.today.year();
    run(source, store, settings, |raw| reshape::reshape_daily(raw, year)).await
}

pub async fn run_weekly(
    source: &dyn ReportSource,
    store: &dyn Warehouse,
    settings: &RunSettings,
) -> Result<LoadReport, RunFailure> {
    run(source, store, settings, |raw| reshape::weekly_summaries(&raw)).await
}

async fn run<R, F>(
    source: &dyn ReportSource,
    store: &dyn Warehouse,
    settings: &RunSettings,
    shape: F,
) -> Result<LoadReport, RunFailure>
where
    R: SchoolActivity,
    F: FnOnce(RawTable) -> Result<Vec<R>, EtlError>,
{
    let mut progress = Progress::default();

    let body = source::fetch_with_retry(source, &settings.retry)
        .await
        .map_err(|err| progress.fail(err))?;
    let raw = source::parse_report(body.as_bytes(), settings.today).map_err(|err| progress.fail(err))?;
    progress.advance(RunStage::Fetched);

    let records = shape(raw).map_err(|err| progress.fail(err))?;
    let reshaped = records.len();
    tracing::info!(rows = reshaped, "report reshaped");
    progress.advance(RunStage::Reshaped);

    let watermark = loader::read_watermark(store, &settings.table, R::WATERMARK_COLUMN)
        .await
        .map_err(|err| progress.fail(err))?;
    match watermark {
        Some(date) => tracing::info!(table = %settings.table, %date, "watermark read"),
        None => tracing::info!(table = %settings.table, "no watermark, loading everything"),
    }
    progress.advance(RunStage::WatermarkRead);

    let fresh = loader::filter_new(records, watermark);
    tracing::info!(kept = fresh.len(), skipped = reshaped - fresh.len(), "records filtered");
    progress.advance(RunStage::Filtered);

    let inserted = loader::append(store, &settings.table, &fresh)
        .await
        .map_err(|err| progress.fail(err))?;
    tracing::info!(table = %settings.table, "{}", report::inserted_message(inserted));
    progress.advance(RunStage::Appended);

    Ok(LoadReport {
        summary: report::build_summary(&settings.table.to_string(), watermark, inserted, &fresh),
        table: settings.table.clone(),
        watermark,
        reshaped,
        inserted,
    })
}
