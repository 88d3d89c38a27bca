use std::fmt::Write;

use chrono::NaiveDate;

use crate::loader::Loadable;
use crate::models::{NormalizedActivityRecord, WeeklyActivitySummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchoolSummary {
    pub school: String,
    pub rows: usize,
    pub active_days: i64,
}

/// Anything the run summary can tally per school.
pub trait SchoolActivity: Loadable {
    fn school(&self) -> Option<&str>;
    fn active_days(&self) -> i64;
}

impl SchoolActivity for NormalizedActivityRecord {
    fn school(&self) -> Option<&str> {
        self.school_name.as_deref()
    }

    fn active_days(&self) -> i64 {
        i64::from(self.was_active)
    }
}

impl SchoolActivity for WeeklyActivitySummary {
    fn school(&self) -> Option<&str> {
        self.school_name.as_deref()
    }

    fn active_days(&self) -> i64 {
        i64::from(self.days_active)
    }
}

pub fn summarize_by_school<R: SchoolActivity>(records: &[R]) -> Vec<SchoolSummary> {
    let mut map: std::collections::HashMap<String, (usize, i64)> =
        std::collections::HashMap::new();

    for record in records {
        let school = record.school().unwrap_or("(no school)").to_string();
        let entry = map.entry(school).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += record.active_days();
    }

    let mut summaries: Vec<SchoolSummary> = map
        .into_iter()
        .map(|(school, (rows, active_days))| SchoolSummary {
            school,
            rows,
            active_days,
        })
        .collect();

    summaries.sort_by(|a, b| b.rows.cmp(&a.rows).then_with(|| a.school.cmp(&b.school)));
    summaries
}

pub fn date_span<R: Loadable>(records: &[R]) -> Option<(NaiveDate, NaiveDate)> {
    let dates = records.iter().filter_map(Loadable::watermark_date);
    let (min, max) = dates.fold((None, None), |(min, max): (Option<NaiveDate>, Option<NaiveDate>), date| {
        (
            Some(min.map_or(date, |current| current.min(date))),
            Some(max.map_or(date, |current| current.max(date))),
        )
    });
    min.zip(max)
}

pub fn inserted_message(inserted: u64) -> String {
    format!("Inserted {inserted} new records.")
}

/// Plain-text block appended to the success notification.
pub fn build_summary<R: SchoolActivity>(
    table: &str,
    watermark: Option<NaiveDate>,
    inserted: u64,
    records: &[R],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "{}", inserted_message(inserted));
    let _ = writeln!(output, "Destination: {table}");
    match watermark {
        Some(date) => {
            let _ = writeln!(output, "Watermark: {date}");
        }
        None => {
            let _ = writeln!(output, "Watermark: none (first load)");
        }
    }
    if let Some((first, last)) = date_span(records) {
        let _ = writeln!(output, "Dates loaded: {first} to {last}");
    }

    let summaries = summarize_by_school(records);
    if !summaries.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "By school:");
        for summary in &summaries {
            let _ = writeln!(
                output,
                "- {}: {} rows, {} active days",
                summary.school, summary.rows, summary.active_days
            );
        }
    }

    output
}
