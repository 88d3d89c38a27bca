use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::Serialize;

use crate::schema::normalize_label;

/// Wide report as read from the source file, one row per student.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    /// Out-of-band first line of the file, e.g. the reporting week.
    pub date_range: Option<String>,
    pub headers: Vec<String>,
    /// Cells in header order; empty cells are `None`.
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    /// Looks a column up by label, ignoring the space/underscore difference.
    pub fn column_index(&self, label: &str) -> Option<usize> {
        let wanted = normalize_label(label);
        self.headers
            .iter()
            .position(|header| normalize_label(header) == wanted)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .and_then(|cell| cell.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentIdentity {
    pub school_name: Option<String>,
    pub student_name: Option<String>,
    pub student_id: Option<String>,
    pub grade_level: Option<String>,
    pub last_active_date: Option<String>,
    pub date_uploaded: Option<String>,
    pub portfolio_link: Option<String>,
}

/// One (student, day) pair between pivot and the final record. `D` is the
/// source column label before date resolution and a `NaiveDate` after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongRow<D> {
    pub identity: StudentIdentity,
    pub active_date: D,
    pub was_active: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedActivityRecord {
    #[serde(rename = "School_Name")]
    pub school_name: Option<String>,
    #[serde(rename = "Student_Name")]
    pub student_name: Option<String>,
    #[serde(rename = "Student_ID")]
    pub student_id: Option<String>,
    #[serde(rename = "Grade_Level")]
    pub grade_level: Option<String>,
    #[serde(rename = "Active_Date")]
    pub active_date: NaiveDate,
    #[serde(rename = "WasActive")]
    pub was_active: i32,
    #[serde(rename = "Last_Active_Date")]
    pub last_active_date: Option<NaiveDate>,
    #[serde(rename = "Date_Uploaded")]
    pub extract_date: NaiveDate,
    #[serde(rename = "Link_to_Student_Portfolio")]
    pub portfolio_link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekRange {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyActivitySummary {
    #[serde(rename = "School_Name")]
    pub school_name: Option<String>,
    #[serde(rename = "Student_Name")]
    pub student_name: Option<String>,
    #[serde(rename = "Student_ID")]
    pub student_id: Option<String>,
    #[serde(rename = "Grade_Level")]
    pub grade_level: Option<String>,
    #[serde(rename = "Days_Active")]
    pub days_active: i32,
    #[serde(rename = "Journal_Posts")]
    pub journal_posts: i32,
    #[serde(rename = "Comments")]
    pub comments: i32,
    #[serde(rename = "Days_With_Posts")]
    pub days_with_posts: i32,
    #[serde(rename = "Days_Commented")]
    pub days_commented: i32,
    #[serde(rename = "Connected_Family_Members")]
    pub connected_family_members: i32,
    #[serde(rename = "Last_Active_Date")]
    pub last_active_date: Option<NaiveDate>,
    #[serde(rename = "Week_Start")]
    pub week_start: NaiveDate,
    #[serde(rename = "Week_End")]
    pub week_end: NaiveDate,
    #[serde(rename = "Date_Uploaded")]
    pub extract_date: NaiveDate,
}
