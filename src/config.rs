use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::source::RetryPolicy;
use crate::warehouse::TableRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Folder { path: PathBuf, prefix: String },
    Link(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub job_name: String,
    pub database_url: String,
    pub source: SourceLocation,
    pub daily_table: TableRef,
    pub weekly_table: TableRef,
    pub webhook_url: Option<String>,
    pub log_file: PathBuf,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let or_default = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let database_url = var("DATABASE_URL")
            .context("DATABASE_URL must be set to the warehouse Postgres instance")?;

        let source = match (var("SEESAW_FOLDER"), var("SEESAW_REPORT_URL")) {
            (Some(path), _) => SourceLocation::Folder {
                path: PathBuf::from(path),
                prefix: or_default("SEESAW_FILE_PREFIX", "KIPP_Bay_Area_Schools"),
            },
            (None, Some(url)) => SourceLocation::Link(url),
            (None, None) => bail!("set SEESAW_FOLDER or SEESAW_REPORT_URL to locate the report"),
        };

        let schema = or_default("SEESAW_SCHEMA", "custom");
        let max_attempts: u32 = or_default("FETCH_MAX_ATTEMPTS", "5")
            .parse()
            .context("FETCH_MAX_ATTEMPTS must be a whole number")?;
        let base_delay_ms: u64 = or_default("FETCH_BASE_DELAY_MS", "2000")
            .parse()
            .context("FETCH_BASE_DELAY_MS must be a whole number of milliseconds")?;

        Ok(Self {
            job_name: or_default("JOB_NAME", "SeeSaw Student Activity"),
            database_url,
            source,
            daily_table: TableRef::new(
                schema.clone(),
                or_default("SEESAW_DAILY_TABLE", "seesaw_student_activity"),
            ),
            weekly_table: TableRef::new(
                schema,
                or_default("SEESAW_WEEKLY_TABLE", "seesaw_weekly_activity"),
            ),
            webhook_url: var("NOTIFY_WEBHOOK_URL"),
            log_file: PathBuf::from(or_default("LOG_FILE", "app.log")),
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_delay_ms),
            },
        })
    }
}
