use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

use crate::error::{EtlError, Result};
use crate::models::{
    LongRow, NormalizedActivityRecord, RawTable, StudentIdentity, WeekRange,
    WeeklyActivitySummary,
};
use crate::schema::{self, normalize_label};

/// Absent activity cells mean the student did not engage that day.
pub const NOT_ACTIVE: i32 = 0;

const CALENDAR_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"];

/// Runs the daily reshape: drop, normalize, pivot, resolve, fill.
pub fn reshape_daily(raw: RawTable, year: i32) -> Result<Vec<NormalizedActivityRecord>> {
    let raw = drop_unneeded_columns(raw)?;
    let raw = normalize_column_names(raw);
    let long = pivot_by_date(&raw)?;
    let dated = resolve_active_date(long, year)?;
    let filled = fill_missing_activity(dated);
    filled.into_iter().map(into_record).collect()
}

pub fn drop_unneeded_columns(mut raw: RawTable) -> Result<RawTable> {
    schema::validate_columns(&raw, schema::DROPPED_COLUMNS)?;

    let dropped: Vec<String> = schema::DROPPED_COLUMNS
        .iter()
        .map(|label| normalize_label(label))
        .collect();
    let keep: Vec<bool> = raw
        .headers
        .iter()
        .map(|header| !dropped.contains(&normalize_label(header)))
        .collect();

    raw.headers = retain_by_mask(raw.headers, &keep);
    raw.rows = raw
        .rows
        .into_iter()
        .map(|row| retain_by_mask(row, &keep))
        .collect();
    Ok(raw)
}

pub fn normalize_column_names(mut raw: RawTable) -> RawTable {
    raw.headers = raw.headers.iter().map(|header| normalize_label(header)).collect();
    raw
}

/// Melts every `Active*` column into one row per (student, column). Rows come
/// out grouped by column, students in source order within each group.
pub fn pivot_by_date(raw: &RawTable) -> Result<Vec<LongRow<String>>> {
    let active: Vec<usize> = raw
        .headers
        .iter()
        .enumerate()
        .filter(|(_, header)| schema::is_active_column(header))
        .map(|(index, _)| index)
        .collect();
    if active.is_empty() {
        return Err(EtlError::SchemaMismatch {
            missing: vec![format!("{}*", schema::ACTIVE_LABEL_PREFIX)],
        });
    }

    schema::validate_columns(raw, schema::ID_COLUMNS)?;
    let id_index: Vec<usize> = schema::ID_COLUMNS
        .iter()
        .filter_map(|label| raw.column_index(label))
        .collect();

    let identities: Vec<StudentIdentity> = (0..raw.rows.len())
        .map(|row| {
            let cell = |slot: usize| raw.cell(row, id_index[slot]).map(str::to_string);
            StudentIdentity {
                school_name: cell(0),
                student_name: cell(1),
                student_id: cell(2),
                grade_level: cell(3),
                last_active_date: cell(4),
                date_uploaded: cell(5),
                portfolio_link: cell(6),
            }
        })
        .collect();

    let mut long = Vec::with_capacity(active.len() * identities.len());
    for &column in &active {
        let label = &raw.headers[column];
        for (row, identity) in identities.iter().enumerate() {
            long.push(LongRow {
                identity: identity.clone(),
                active_date: label.clone(),
                was_active: parse_flag(label, raw.cell(row, column))?,
            });
        }
    }
    Ok(long)
}

/// Turns `Active_MM/DD` into a date in `year`. The export carries no year, so
/// a report spanning New Year lands partly in the wrong one.
pub fn resolve_active_date(rows: Vec<LongRow<String>>, year: i32) -> Result<Vec<LongRow<NaiveDate>>> {
    rows.into_iter()
        .map(|row| -> Result<LongRow<NaiveDate>> {
            let month_day = row
                .active_date
                .strip_prefix(schema::ACTIVE_LABEL_PREFIX)
                .unwrap_or(&row.active_date);
            let active_date =
                NaiveDate::parse_from_str(&format!("{month_day}/{year}"), "%m/%d/%Y")
                    .map_err(|err| EtlError::date_parse(row.active_date.as_str(), err))?;
            Ok(LongRow {
                identity: row.identity,
                active_date,
                was_active: row.was_active,
            })
        })
        .collect()
}

pub fn fill_missing_activity<D>(rows: Vec<LongRow<D>>) -> Vec<LongRow<D>> {
    rows.into_iter()
        .map(|mut row| {
            row.was_active = Some(row.was_active.unwrap_or(NOT_ACTIVE));
            row
        })
        .collect()
}

fn into_record(row: LongRow<NaiveDate>) -> Result<NormalizedActivityRecord> {
    let identity = row.identity;
    let last_active_date = parse_last_active(identity.last_active_date.as_deref());
    let extract_date = parse_optional_date(identity.date_uploaded.as_deref())?
        .ok_or_else(|| EtlError::date_parse("", "row has no Date_Uploaded"))?;

    Ok(NormalizedActivityRecord {
        school_name: identity.school_name,
        student_name: identity.student_name,
        student_id: identity.student_id,
        grade_level: identity.grade_level,
        active_date: row.active_date,
        was_active: row.was_active.unwrap_or(NOT_ACTIVE),
        last_active_date,
        extract_date,
        portfolio_link: identity.portfolio_link,
    })
}

/// One summary row per student, stamped with the week from the header line.
pub fn weekly_summaries(raw: &RawTable) -> Result<Vec<WeeklyActivitySummary>> {
    let range_line = raw
        .date_range
        .as_deref()
        .ok_or_else(|| EtlError::date_parse("", "report has no date range line"))?;
    let week = parse_week_range(range_line)?;

    let mut required: Vec<&str> = schema::ID_COLUMNS.to_vec();
    required.extend_from_slice(schema::WEEKLY_COUNTERS);
    schema::validate_columns(raw, &required)?;

    let index = |label: &str| raw.column_index(label).unwrap_or_default();
    let text = |row: usize, label: &str| raw.cell(row, index(label)).map(str::to_string);
    let counter = |row: usize, label: &str| -> Result<i32> {
        Ok(parse_count(label, raw.cell(row, index(label)))?.unwrap_or(0))
    };

    (0..raw.rows.len())
        .map(|row| -> Result<WeeklyActivitySummary> {
            Ok(WeeklyActivitySummary {
                school_name: text(row, schema::SCHOOL_NAME),
                student_name: text(row, schema::STUDENT_NAME),
                student_id: text(row, schema::STUDENT_ID),
                grade_level: text(row, schema::GRADE_LEVEL),
                days_active: counter(row, schema::DAYS_ACTIVE)?,
                journal_posts: counter(row, schema::JOURNAL_POSTS)?,
                comments: counter(row, schema::COMMENTS)?,
                days_with_posts: counter(row, schema::DAYS_WITH_POSTS)?,
                days_commented: counter(row, schema::DAYS_COMMENTED)?,
                connected_family_members: counter(row, schema::CONNECTED_FAMILY)?,
                last_active_date: parse_last_active(
                    raw.cell(row, index(schema::LAST_ACTIVE_DATE)),
                ),
                week_start: week.start.date_naive(),
                week_end: week.end.date_naive(),
                extract_date: parse_optional_date(raw.cell(row, index(schema::DATE_UPLOADED)))?
                    .ok_or_else(|| EtlError::date_parse("", "row has no Date_Uploaded"))?,
            })
        })
        .collect()
}

/// Parses `"<start> - <end>"`, each side `YYYY-MM-DD HH:MM <zone>±HH:MM`.
pub fn parse_week_range(line: &str) -> Result<WeekRange> {
    let (start, end) = line
        .split_once(" - ")
        .ok_or_else(|| EtlError::date_parse(line, "expected '<start> - <end>'"))?;
    Ok(WeekRange {
        start: parse_zoned_timestamp(start.trim())?,
        end: parse_zoned_timestamp(end.trim())?,
    })
}

fn parse_zoned_timestamp(value: &str) -> Result<DateTime<FixedOffset>> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    let [date, time, zone] = parts.as_slice() else {
        return Err(EtlError::date_parse(value, "expected 'YYYY-MM-DD HH:MM TZ'"));
    };

    let local = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M")
        .map_err(|err| EtlError::date_parse(value, err))?;
    let offset = parse_offset(zone).ok_or_else(|| EtlError::date_parse(value, "bad zone offset"))?;
    local
        .and_local_timezone(offset)
        .single()
        .ok_or_else(|| EtlError::date_parse(value, "ambiguous local time"))
}

/// `GMT-07:00`, `UTC+0530`, `-7` and a bare `UTC` are all accepted.
fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let Some(sign_at) = zone.rfind(['+', '-']) else {
        return if zone.chars().all(|c| c.is_ascii_alphabetic()) {
            FixedOffset::east_opt(0)
        } else {
            None
        };
    };
    let sign = if zone[sign_at..].starts_with('-') { -1 } else { 1 };
    let digits: String = zone[sign_at + 1..].chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().ok()?, 0),
        3 | 4 => {
            let split = digits.len() - 2;
            (digits[..split].parse::<i32>().ok()?, digits[split..].parse::<i32>().ok()?)
        }
        _ => return None,
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

pub fn parse_calendar_date(value: &str) -> Result<NaiveDate> {
    let day = value.split_whitespace().next().unwrap_or(value);
    CALENDAR_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(day, format).ok())
        .ok_or_else(|| EtlError::date_parse(value, "unrecognised date format"))
}

fn parse_optional_date(value: Option<&str>) -> Result<Option<NaiveDate>> {
    value.map(parse_calendar_date).transpose()
}

/// Students who never logged in carry placeholders such as `Never` or `-`
/// here; anything that is not a date reads as no activity on record.
fn parse_last_active(value: Option<&str>) -> Option<NaiveDate> {
    value.and_then(|value| parse_calendar_date(value).ok())
}

/// Activity cells hold 1/0, sometimes written as floats by the exporter.
fn parse_flag(column: &str, value: Option<&str>) -> Result<Option<i32>> {
    Ok(parse_count(column, value)?.map(|count| i32::from(count != 0)))
}

fn parse_count(column: &str, value: Option<&str>) -> Result<Option<i32>> {
    let Some(value) = value else {
        return Ok(None);
    };
    value
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
        .map(|number| Some(number.round() as i32))
        .ok_or_else(|| EtlError::InvalidValue {
            column: column.to_string(),
            value: value.to_string(),
        })
}

fn retain_by_mask<T>(items: Vec<T>, keep: &[bool]) -> Vec<T> {
    items
        .into_iter()
        .zip(keep)
        .filter(|(_, keep)| **keep)
        .map(|(item, _)| item)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|value| value.map(str::to_string)).collect()
    }

    fn lincoln_report() -> RawTable {
        let mut headers: Vec<String> = vec![
            "School Name",
            "Student Name",
            "Student ID",
            "Grade Level",
            "Last Active Date",
            "Link to Student Portfolio",
            "Active 08/16",
            "Active 08/17",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        headers.extend(schema::DROPPED_COLUMNS.iter().map(|label| label.to_string()));
        headers.push(schema::DATE_UPLOADED.to_string());

        let mut row = cells(&[
            Some("Lincoln"),
            Some("Ana R."),
            Some("S1"),
            Some("3"),
            Some("2020-08-17"),
            Some("http://x"),
            Some("1"),
            None,
        ]);
        row.extend(schema::DROPPED_COLUMNS.iter().map(|_| Some("2".to_string())));
        row.push(Some("2020-08-18".to_string()));

        RawTable {
            date_range: Some("2020-08-10 00:00 GMT-07:00 - 2020-08-16 23:59 GMT-07:00".to_string()),
            headers,
            rows: vec![row],
        }
    }

    fn normalized_wide(rows: Vec<Vec<Option<String>>>) -> RawTable {
        RawTable {
            date_range: None,
            headers: vec![
                "School_Name",
                "Student_Name",
                "Student_ID",
                "Grade_Level",
                "Last_Active_Date",
                "Date_Uploaded",
                "Link_to_Student_Portfolio",
                "Active_08/16",
                "Active_08/17",
                "Active_08/18",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            rows,
        }
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn reshapes_sample_report_into_two_days() {
        let records = reshape_daily(lincoln_report(), 2020).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.school_name.as_deref(), Some("Lincoln"));
        assert_eq!(first.student_name.as_deref(), Some("Ana R."));
        assert_eq!(first.student_id.as_deref(), Some("S1"));
        assert_eq!(first.grade_level.as_deref(), Some("3"));
        assert_eq!(first.active_date, date(2020, 8, 16));
        assert_eq!(first.was_active, 1);
        assert_eq!(first.last_active_date, Some(date(2020, 8, 17)));
        assert_eq!(first.extract_date, date(2020, 8, 18));
        assert_eq!(first.portfolio_link.as_deref(), Some("http://x"));

        assert_eq!(records[1].active_date, date(2020, 8, 17));
        assert_eq!(records[1].was_active, 0);
    }

    #[test]
    fn never_active_placeholder_loads_without_last_active_date() {
        let mut raw = lincoln_report();
        raw.rows[0][4] = Some("Never".to_string());

        let records = reshape_daily(raw.clone(), 2020).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.last_active_date.is_none()));

        let summaries = weekly_summaries(&raw).unwrap();
        assert_eq!(summaries[0].last_active_date, None);
    }

    #[test]
    fn unreadable_upload_date_still_fails() {
        let mut raw = lincoln_report();
        let last = raw.rows[0].len() - 1;
        raw.rows[0][last] = Some("-".to_string());
        assert!(matches!(reshape_daily(raw, 2020), Err(EtlError::DateParse { .. })));
    }

    #[test]
    fn dropping_requires_every_known_aggregate() {
        let mut raw = lincoln_report();
        let position = raw
            .headers
            .iter()
            .position(|header| header == "Comments Yesterday")
            .unwrap();
        raw.headers.remove(position);
        raw.rows[0].remove(position);

        match drop_unneeded_columns(raw).unwrap_err() {
            EtlError::SchemaMismatch { missing } => {
                assert_eq!(missing, vec!["Comments Yesterday".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn dropping_removes_cells_alongside_headers() {
        let dropped = drop_unneeded_columns(lincoln_report()).unwrap();
        assert_eq!(dropped.headers.len(), 9);
        assert_eq!(dropped.rows[0].len(), 9);
        assert!(!dropped.headers.iter().any(|h| h.starts_with("Active Yesterday")));
    }

    #[test]
    fn normalizing_twice_matches_once() {
        let once = normalize_column_names(lincoln_report());
        let twice = normalize_column_names(once.clone());
        assert_eq!(once, twice);
        assert!(once.headers.iter().all(|header| !header.contains(' ')));
    }

    #[test]
    fn pivot_yields_one_row_per_student_day() {
        let rows = vec![
            cells(&[Some("Lincoln"), Some("Ana"), Some("S1"), Some("3"), None, Some("2020-08-19"), None, Some("1"), Some("0"), None]),
            cells(&[Some("Lincoln"), Some("Ben"), Some("S2"), Some("4"), None, Some("2020-08-19"), None, None, Some("1"), Some("1")]),
        ];
        let long = pivot_by_date(&normalized_wide(rows)).unwrap();
        assert_eq!(long.len(), 3 * 2);

        assert_eq!(long[0].active_date, "Active_08/16");
        assert_eq!(long[0].identity.student_id.as_deref(), Some("S1"));
        assert_eq!(long[1].identity.student_id.as_deref(), Some("S2"));
        assert_eq!(long[1].was_active, None);
        assert_eq!(long[5].active_date, "Active_08/18");
        assert_eq!(long[5].identity.student_name.as_deref(), Some("Ben"));
        assert_eq!(long[5].identity.grade_level.as_deref(), Some("4"));
    }

    #[test]
    fn pivot_needs_at_least_one_activity_column() {
        let mut raw = normalized_wide(Vec::new());
        raw.headers.truncate(7);
        assert!(matches!(
            pivot_by_date(&raw),
            Err(EtlError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn pivot_rejects_non_numeric_activity() {
        let rows = vec![cells(&[
            Some("Lincoln"), Some("Ana"), Some("S1"), Some("3"), None, Some("2020-08-19"), None,
            Some("yes"), None, None,
        ])];
        assert!(matches!(
            pivot_by_date(&normalized_wide(rows)),
            Err(EtlError::InvalidValue { .. })
        ));
    }

    #[test]
    fn float_flags_are_read_as_integers() {
        assert_eq!(parse_flag("Active_08/16", Some("1.0")).unwrap(), Some(1));
        assert_eq!(parse_flag("Active_08/16", Some("0.0")).unwrap(), Some(0));
    }

    #[test]
    fn resolves_well_formed_labels() {
        let row = LongRow {
            identity: StudentIdentity::default(),
            active_date: "Active_02/29".to_string(),
            was_active: Some(1),
        };
        let resolved = resolve_active_date(vec![row], 2020).unwrap();
        assert_eq!(resolved[0].active_date, date(2020, 2, 29));
    }

    #[test]
    fn rejects_impossible_month_day() {
        let row = LongRow {
            identity: StudentIdentity::default(),
            active_date: "Active_13/40".to_string(),
            was_active: None,
        };
        match resolve_active_date(vec![row], 2020).unwrap_err() {
            EtlError::DateParse { value, .. } => assert_eq!(value, "Active_13/40"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn fill_is_idempotent() {
        let rows = vec![
            LongRow { identity: StudentIdentity::default(), active_date: date(2020, 8, 16), was_active: None },
            LongRow { identity: StudentIdentity::default(), active_date: date(2020, 8, 17), was_active: Some(1) },
        ];
        let once = fill_missing_activity(rows);
        let twice = fill_missing_activity(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once[0].was_active, Some(NOT_ACTIVE));
        assert_eq!(once[1].was_active, Some(1));
    }

    #[test]
    fn parses_week_range_header() {
        let range = parse_week_range("2020-08-10 00:00 GMT-07:00 - 2020-08-16 23:59 GMT-07:00").unwrap();
        assert_eq!(range.start.date_naive(), date(2020, 8, 10));
        assert_eq!(range.end.date_naive(), date(2020, 8, 16));
        assert_eq!(range.start.offset().local_minus_utc(), -7 * 3600);
    }

    #[test]
    fn rejects_range_without_separator() {
        assert!(matches!(
            parse_week_range("2020-08-10 00:00 UTC"),
            Err(EtlError::DateParse { .. })
        ));
    }

    #[test]
    fn offsets_accept_several_spellings() {
        assert_eq!(parse_offset("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_offset("UTC+0530").unwrap().local_minus_utc(), 5 * 3600 + 1800);
        assert_eq!(parse_offset("-7").unwrap().local_minus_utc(), -7 * 3600);
        assert!(parse_offset("GMT-xx").is_none());
    }

    #[test]
    fn weekly_summary_reads_counters_and_week() {
        let summaries = weekly_summaries(&lincoln_report()).unwrap();
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.days_active, 2);
        assert_eq!(summary.connected_family_members, 2);
        assert_eq!(summary.week_start, date(2020, 8, 10));
        assert_eq!(summary.week_end, date(2020, 8, 16));
        assert_eq!(summary.last_active_date, Some(date(2020, 8, 17)));
    }

    #[test]
    fn weekly_summary_needs_range_line() {
        let mut raw = lincoln_report();
        raw.date_range = None;
        assert!(matches!(weekly_summaries(&raw), Err(EtlError::DateParse { .. })));
    }

    #[test]
    fn calendar_dates_accept_export_formats() {
        assert_eq!(parse_calendar_date("2020-08-17").unwrap(), date(2020, 8, 17));
        assert_eq!(parse_calendar_date("08/17/2020").unwrap(), date(2020, 8, 17));
        assert_eq!(parse_calendar_date("2020-08-17 10:31:00").unwrap(), date(2020, 8, 17));
        assert!(parse_calendar_date("last week").is_err());
    }
}
