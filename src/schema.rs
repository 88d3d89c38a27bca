//! Column layout of the SeeSaw activity export and of the warehouse tables
//! it lands in. Source labels are written the way the export spells them;
//! lookups compare them after `normalize_label`.

use crate::error::{EtlError, Result};
use crate::models::RawTable;
use crate::warehouse::{ColumnDef, ColumnKind};

/// Per-day indicator columns start with this.
pub const ACTIVE_PREFIX: &str = "Active";
/// What the per-day label looks like once spaces became underscores.
pub const ACTIVE_LABEL_PREFIX: &str = "Active_";

/// Added at read time; the export does not carry it.
pub const DATE_UPLOADED: &str = "Date Uploaded";

/// Aggregate and link columns the daily load does not keep.
pub const DROPPED_COLUMNS: &[&str] = &[
    "Days Active in Past Week",
    "Posts Added to Student Journal in Past Week",
    "Comments in Past Week",
    "Posts Added to Student Journal Yesterday",
    "Comments Yesterday",
    "Days with Posts Added to Student Journal In Past Week",
    "Days Commented in Past Week",
    "Connected Family Members",
    "Active Yesterday (1 = yes)",
    "Active in Last 7 Days (1 = yes)",
    "Link to School Dashboard",
];

pub const SCHOOL_NAME: &str = "School Name";
pub const STUDENT_NAME: &str = "Student Name";
pub const STUDENT_ID: &str = "Student ID";
pub const GRADE_LEVEL: &str = "Grade Level";
pub const LAST_ACTIVE_DATE: &str = "Last Active Date";
pub const PORTFOLIO_LINK: &str = "Link to Student Portfolio";

/// Columns carried through the pivot, in output order.
pub const ID_COLUMNS: &[&str] = &[
    SCHOOL_NAME,
    STUDENT_NAME,
    STUDENT_ID,
    GRADE_LEVEL,
    LAST_ACTIVE_DATE,
    DATE_UPLOADED,
    PORTFOLIO_LINK,
];

pub const DAYS_ACTIVE: &str = "Days Active in Past Week";
pub const JOURNAL_POSTS: &str = "Posts Added to Student Journal in Past Week";
pub const COMMENTS: &str = "Comments in Past Week";
pub const DAYS_WITH_POSTS: &str = "Days with Posts Added to Student Journal In Past Week";
pub const DAYS_COMMENTED: &str = "Days Commented in Past Week";
pub const CONNECTED_FAMILY: &str = "Connected Family Members";

pub const WEEKLY_COUNTERS: &[&str] = &[
    DAYS_ACTIVE,
    JOURNAL_POSTS,
    COMMENTS,
    DAYS_WITH_POSTS,
    DAYS_COMMENTED,
    CONNECTED_FAMILY,
];

pub const DAILY_WATERMARK_COLUMN: &str = "Active_Date";
pub const WEEKLY_WATERMARK_COLUMN: &str = "Last_Active_Date";

pub const DAILY_TABLE_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("School_Name", ColumnKind::Text),
    ColumnDef::new("Student_Name", ColumnKind::Text),
    ColumnDef::new("Student_ID", ColumnKind::Text),
    ColumnDef::new("Grade_Level", ColumnKind::Text),
    ColumnDef::new(DAILY_WATERMARK_COLUMN, ColumnKind::Date),
    ColumnDef::new("WasActive", ColumnKind::Integer),
    ColumnDef::new("Last_Active_Date", ColumnKind::Date),
    ColumnDef::new("Date_Uploaded", ColumnKind::Date),
    ColumnDef::new("Link_to_Student_Portfolio", ColumnKind::Text),
];

pub const WEEKLY_TABLE_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("School_Name", ColumnKind::Text),
    ColumnDef::new("Student_Name", ColumnKind::Text),
    ColumnDef::new("Student_ID", ColumnKind::Text),
    ColumnDef::new("Grade_Level", ColumnKind::Text),
    ColumnDef::new("Days_Active", ColumnKind::Integer),
    ColumnDef::new("Journal_Posts", ColumnKind::Integer),
    ColumnDef::new("Comments", ColumnKind::Integer),
    ColumnDef::new("Days_With_Posts", ColumnKind::Integer),
    ColumnDef::new("Days_Commented", ColumnKind::Integer),
    ColumnDef::new("Connected_Family_Members", ColumnKind::Integer),
    ColumnDef::new(WEEKLY_WATERMARK_COLUMN, ColumnKind::Date),
    ColumnDef::new("Week_Start", ColumnKind::Date),
    ColumnDef::new("Week_End", ColumnKind::Date),
    ColumnDef::new("Date_Uploaded", ColumnKind::Date),
];

pub fn normalize_label(label: &str) -> String {
    label.replace(' ', "_")
}

pub fn is_active_column(label: &str) -> bool {
    label.starts_with(ACTIVE_PREFIX)
}

/// Fails with every missing column at once rather than the first one hit.
pub fn validate_columns(table: &RawTable, required: &[&str]) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|label| table.column_index(label).is_none())
        .map(|label| label.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(EtlError::SchemaMismatch { missing })
    }
}
