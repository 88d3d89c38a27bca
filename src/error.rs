use thiserror::Error;

pub type Result<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("source schema changed, missing columns: {}", .missing.join(", "))]
    SchemaMismatch { missing: Vec<String> },

    #[error("could not parse date '{value}': {reason}")]
    DateParse { value: String, reason: String },

    #[error("column '{column}' holds non-numeric value '{value}'")]
    InvalidValue { column: String, value: String },

    #[error("report not found: {0}")]
    SourceNotFound(String),

    #[error("warehouse unavailable: {0}")]
    StoreUnavailable(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("csv read failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("io failed: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    pub fn date_parse(value: impl Into<String>, reason: impl ToString) -> Self {
        EtlError::DateParse {
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<sqlx::Error> for EtlError {
    fn from(err: sqlx::Error) -> Self {
        EtlError::StoreUnavailable(err.to_string())
    }
}
