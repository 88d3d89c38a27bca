use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;

use crate::error::{EtlError, Result};
use crate::models::RawTable;
use crate::schema;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Ready(String),
    /// The upstream export is still being generated.
    RetryableNotReady(String),
}

#[async_trait]
pub trait ReportSource: Send + Sync {
    fn describe(&self) -> String;

    async fn poll(&self) -> Result<FetchOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (0-based), doubling up to a minute.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

pub async fn fetch_with_retry(source: &dyn ReportSource, policy: &RetryPolicy) -> Result<String> {
    let attempts = policy.max_attempts.max(1);
    let mut last_reason = String::from("no attempt made");

    for attempt in 0..attempts {
        match source.poll().await? {
            FetchOutcome::Ready(body) => {
                tracing::info!(source = %source.describe(), attempt = attempt + 1, "report fetched");
                return Ok(body);
            }
            FetchOutcome::RetryableNotReady(reason) => {
                tracing::warn!(source = %source.describe(), attempt = attempt + 1, %reason, "report not ready");
                last_reason = reason;
                if attempt + 1 < attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
        }
    }

    Err(EtlError::SourceNotFound(format!(
        "{} after {attempts} attempts: {last_reason}",
        source.describe()
    )))
}

/// Reads the export: line one is the out-of-band date range, line two the
/// header. A `Date Uploaded` column holding `extract_date` is appended.
pub fn parse_report<R: Read>(reader: R, extract_date: NaiveDate) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut records = reader.records();

    let date_range = match records.next() {
        Some(record) => record?
            .iter()
            .find(|field| !field.is_empty())
            .map(str::to_string),
        None => None,
    };
    let headers: Vec<String> = match records.next() {
        Some(record) => record?.iter().map(str::to_string).collect(),
        None => {
            return Err(EtlError::SchemaMismatch {
                missing: vec!["header row".to_string()],
            })
        }
    };

    let width = headers.len();
    let mut table = RawTable {
        date_range,
        headers,
        rows: Vec::new(),
    };
    for record in records {
        let record = record?;
        let mut row: Vec<Option<String>> = record
            .iter()
            .take(width)
            .map(|field| (!field.is_empty()).then(|| field.to_string()))
            .collect();
        row.resize(width, None);
        table.rows.push(row);
    }

    if table.column_index(schema::DATE_UPLOADED).is_none() {
        table.headers.push(schema::DATE_UPLOADED.to_string());
        let stamp = extract_date.format("%Y-%m-%d").to_string();
        for row in &mut table.rows {
            row.push(Some(stamp.clone()));
        }
    }
    Ok(table)
}

/// Local drop folder; the newest export is the one with the greatest name.
pub struct FolderSource {
    pub folder: PathBuf,
    pub prefix: String,
}

impl FolderSource {
    fn latest_file(&self) -> Result<Option<PathBuf>> {
        let mut candidates = Vec::new();
        for entry in std::fs::read_dir(&self.folder)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if name.starts_with(&self.prefix) && name.to_ascii_lowercase().ends_with(".csv") {
                candidates.push(path);
            }
        }
        candidates.sort();
        Ok(candidates.pop())
    }
}

#[async_trait]
impl ReportSource for FolderSource {
    fn describe(&self) -> String {
        format!("folder {}", self.folder.display())
    }

    async fn poll(&self) -> Result<FetchOutcome> {
        match self.latest_file()? {
            Some(path) => {
                tracing::info!(file = %path.display(), "reading report file");
                Ok(FetchOutcome::Ready(std::fs::read_to_string(&path)?))
            }
            None => Ok(FetchOutcome::RetryableNotReady(format!(
                "no {}*.csv in {}",
                self.prefix,
                self.folder.display()
            ))),
        }
    }
}

/// Download link from the report email.
pub struct LinkSource {
    client: reqwest::Client,
    url: String,
}

impl LinkSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ReportSource for LinkSource {
    fn describe(&self) -> String {
        format!("link {}", self.url)
    }

    async fn poll(&self) -> Result<FetchOutcome> {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(err) => return Ok(FetchOutcome::RetryableNotReady(err.to_string())),
        };

        let status = response.status();
        if status.is_success() && status != StatusCode::ACCEPTED {
            return Ok(FetchOutcome::Ready(response.text().await?));
        }
        if link_still_pending(status) {
            Ok(FetchOutcome::RetryableNotReady(format!("server answered {status}")))
        } else {
            Err(EtlError::SourceNotFound(format!("{} answered {status}", self.url)))
        }
    }
}

fn link_still_pending(status: StatusCode) -> bool {
    status == StatusCode::ACCEPTED
        || status == StatusCode::NOT_FOUND
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct ScriptedSource {
        outcomes: Mutex<Vec<FetchOutcome>>,
        polls: Mutex<u32>,
    }

    impl ScriptedSource {
        fn new(mut outcomes: Vec<FetchOutcome>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                polls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ReportSource for ScriptedSource {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        async fn poll(&self) -> Result<FetchOutcome> {
            *self.polls.lock().unwrap() += 1;
            Ok(self
                .outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| FetchOutcome::RetryableNotReady("exhausted".to_string())))
        }
    }

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    fn extract_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 8, 18).unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(9), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn retries_until_report_is_ready() {
        let source = ScriptedSource::new(vec![
            FetchOutcome::RetryableNotReady("generating".to_string()),
            FetchOutcome::Ready("body".to_string()),
        ]);
        let body = fetch_with_retry(&source, &instant_policy(3)).await.unwrap();
        assert_eq!(body, "body");
        assert_eq!(*source.polls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_ceiling() {
        let source = ScriptedSource::new(Vec::new());
        let err = fetch_with_retry(&source, &instant_policy(3)).await.unwrap_err();
        assert!(matches!(err, EtlError::SourceNotFound(_)));
        assert_eq!(*source.polls.lock().unwrap(), 3);
    }

    #[test]
    fn parses_range_line_header_and_nulls() {
        let csv = "\"2020-08-10 00:00 GMT-07:00 - 2020-08-16 23:59 GMT-07:00\"\n\
                   School Name,Student Name,Active 08/16\n\
                   Lincoln,Ana R.,1\n\
                   Lincoln,Ben T.,\n";
        let table = parse_report(csv.as_bytes(), extract_date()).unwrap();

        assert_eq!(
            table.date_range.as_deref(),
            Some("2020-08-10 00:00 GMT-07:00 - 2020-08-16 23:59 GMT-07:00")
        );
        assert_eq!(
            table.headers,
            vec!["School Name", "Student Name", "Active 08/16", "Date Uploaded"]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1][2], None);
        assert_eq!(table.rows[1][3].as_deref(), Some("2020-08-18"));
    }

    #[test]
    fn short_rows_are_padded() {
        let csv = "range\nA,B,C\n1\n";
        let table = parse_report(csv.as_bytes(), extract_date()).unwrap();
        assert_eq!(table.rows[0].len(), 4);
        assert_eq!(table.rows[0][1], None);
    }

    #[test]
    fn file_without_header_is_rejected() {
        let err = parse_report("only a range line\n".as_bytes(), extract_date()).unwrap_err();
        assert!(matches!(err, EtlError::SchemaMismatch { .. }));
    }

    #[test]
    fn pending_statuses_are_retryable() {
        assert!(link_still_pending(StatusCode::NOT_FOUND));
        assert!(link_still_pending(StatusCode::BAD_GATEWAY));
        assert!(!link_still_pending(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn folder_source_picks_greatest_name() {
        let folder = std::env::temp_dir().join(format!("seesaw-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("KIPP_Bay_Area_Schools_2020-08-10.csv"), "old").unwrap();
        std::fs::write(folder.join("KIPP_Bay_Area_Schools_2020-08-17.csv"), "new").unwrap();
        std::fs::write(folder.join("notes.txt"), "skip").unwrap();

        let source = FolderSource {
            folder: folder.clone(),
            prefix: "KIPP_Bay_Area_Schools".to_string(),
        };
        let outcome = source.poll().await.unwrap();
        std::fs::remove_dir_all(&folder).unwrap();

        assert_eq!(outcome, FetchOutcome::Ready("new".to_string()));
    }

    #[tokio::test]
    async fn empty_folder_is_not_ready() {
        let folder = std::env::temp_dir().join(format!("seesaw-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&folder).unwrap();
        let source = FolderSource {
            folder: folder.clone(),
            prefix: "KIPP".to_string(),
        };
        let outcome = source.poll().await.unwrap();
        std::fs::remove_dir_all(&folder).unwrap();

        assert!(matches!(outcome, FetchOutcome::RetryableNotReady(_)));
    }
}
