use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaxError {
    #[error("unknown vaccine token(s) {tokens:?} for {location}; update the vaccine mapping")]
    UnknownVaccine {
        location: String,
        tokens: Vec<String>,
    },

    #[error(
        "dose ordering violated for {location} on {date}: {lower_field}={lower} exceeds {upper_field}={upper}"
    )]
    DoseOrder {
        location: String,
        date: NaiveDate,
        upper_field: &'static str,
        upper: u64,
        lower_field: &'static str,
        lower: u64,
    },

    #[error(
        "cumulative regression for {location} in {field}: {prior} on {prior_date} -> {current} on {date}"
    )]
    Regression {
        location: String,
        field: String,
        prior_date: NaiveDate,
        prior: u64,
        date: NaiveDate,
        current: u64,
    },

    #[error("{field} above 100% for {location} on {date}: {value}")]
    PercentageBound {
        location: String,
        date: NaiveDate,
        field: &'static str,
        value: f64,
    },

    #[error("source shape changed: {0}")]
    SourceShape(String),

    #[error("invalid count value: '{0}'")]
    InvalidCount(String),

    #[error("invalid date '{value}' for format '{format}'")]
    InvalidDate { value: String, format: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

pub type Result<T> = std::result::Result<T, VaxError>;
