/// LiveSummary Column Declarations
///
/// A column is declared with a name and a kind. Scalar columns hold one atom
/// per row; multi-valued columns hold a label set per row and fan a row out
/// into one key tuple per label when grouped.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a column when it takes part in a grouping key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Scalar,
    MultiValued,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Scalar => write!(f, "scalar"),
            ColumnKind::MultiValued => write!(f, "multi-valued"),
        }
    }
}

/// Declaration of a single column.
///
/// Summary grouping columns carry `source_column`, the name of the source
/// column they mirror. Source columns and the computed `group`/`count`
/// columns leave it empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDecl {
    pub name: String,
    pub kind: ColumnKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_column: Option<String>,
}

impl ColumnDecl {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        ColumnDecl {
            name: name.into(),
            kind,
            source_column: None,
        }
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Scalar)
    }

    pub fn multi_valued(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::MultiValued)
    }

    /// A summary grouping column mirroring `source`. Always scalar: each
    /// summary row holds one atom for it, whatever the source column holds.
    pub fn grouped_from(source: &ColumnDecl) -> Self {
        ColumnDecl {
            name: source.name.clone(),
            kind: ColumnKind::Scalar,
            source_column: Some(source.name.clone()),
        }
    }

    pub fn is_multi_valued(&self) -> bool {
        self.kind == ColumnKind::MultiValued
    }
}
