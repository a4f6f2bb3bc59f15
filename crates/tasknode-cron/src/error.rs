use thiserror::Error;

use crate::field::Field;

/// Reasons a cron expression is rejected or can never fire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    /// The expression does not split into exactly six fields.
    #[error("expected 6 space-separated fields, found {found}")]
    FieldCount { found: usize },

    /// Empty or dangling item in a comma list.
    #[error("invalid comma usage in {field} field: {expr:?}")]
    Comma { field: Field, expr: String },

    /// Malformed `start/step`.
    #[error("invalid slash usage in {field} field: {expr:?}")]
    Slash { field: Field, expr: String },

    /// Malformed `start-end`.
    #[error("invalid dash usage in {field} field: {expr:?}")]
    Dash { field: Field, expr: String },

    /// A token that is neither a number nor a known name.
    #[error("invalid value in {field} field: {token:?}")]
    InvalidValue { field: Field, token: String },

    #[error("value {value} out of range {min}-{max} in {field} field")]
    OutOfRange {
        field: Field,
        value: u32,
        min: u32,
        max: u32,
    },

    /// Malformed `L`, `W` or `#` form, or one used in the wrong field.
    #[error("invalid special form in {field} field: {expr:?}")]
    Special { field: Field, expr: String },

    /// The expression parsed but no instant within the search horizon matches it.
    #[error("expression never matches within {years} years")]
    MatchEmpty { years: i32 },
}

impl CronError {
    /// Short error code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            CronError::FieldCount { .. } => "FIELD_COUNT",
            CronError::Comma { .. } => "COMMA_USE",
            CronError::Slash { .. } => "SLASH_USE",
            CronError::Dash { .. } => "DASH_USE",
            CronError::InvalidValue { .. } => "INVALID_VALUE",
            CronError::OutOfRange { .. } => "OUT_OF_RANGE",
            CronError::Special { .. } => "INVALID_SPECIAL",
            CronError::MatchEmpty { .. } => "MATCH_EMPTY",
        }
    }
}

pub type Result<T> = std::result::Result<T, CronError>;
