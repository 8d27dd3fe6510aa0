/// LiveSummary Errors
///
/// One error enum covers source tables, grouping keys, indexes, summaries and
/// the engine. `StaleTupleReference` marks internal divergence between an
/// index and summary rows; every other variant rejects caller input.

use crate::column::ColumnKind;
use crate::summary::SummaryId;
use crate::table::RowId;
use thiserror::Error;

/// Errors surfaced by source tables, summaries and the engine.
#[derive(Debug, Error)]
pub enum SummaryError {
    /// The grouping specification cannot be applied to the source schema.
    #[error("invalid grouping spec: {0}")]
    InvalidGroupingSpec(String),

    /// Index contents and summary rows disagree. Always aborts the transaction.
    #[error("stale tuple reference: {0}")]
    StaleTupleReference(String),

    #[error("type mismatch in column '{column}': expected {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: ColumnKind,
        found: &'static str,
    },

    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    #[error("column '{0}' already exists")]
    ColumnExists(String),

    #[error("missing value for column '{0}'")]
    MissingValue(String),

    #[error("row {0} not found")]
    RowNotFound(RowId),

    /// Row ids are never reused, so an explicit id must exceed every id handed out so far.
    #[error("row id {id} cannot be assigned (next free id is {next})")]
    RowIdReused { id: RowId, next: RowId },

    /// An explicit id of `RowId::MAX` leaves no id for the next row.
    #[error("row id {0} leaves no room for further row ids")]
    RowIdExhausted(RowId),

    #[error("summary {0} not found")]
    SummaryNotFound(SummaryId),

    #[error("json error: {0}")]
    Config(#[from] serde_json::Error),
}

impl SummaryError {
    pub(crate) fn stale(detail: impl Into<String>) -> Self {
        SummaryError::StaleTupleReference(detail.into())
    }

    /// True for faults that indicate divergence between indexes and summary rows.
    pub fn is_internal(&self) -> bool {
        matches!(self, SummaryError::StaleTupleReference(_))
    }
}

pub type Result<T> = std::result::Result<T, SummaryError>;
