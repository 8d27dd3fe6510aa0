/// Changeset - Source Row Events for LiveSummary
///
/// This module defines data structures for tracking changes to the source
/// table, allowing summaries to update incrementally rather than rebuilding
/// from scratch.
///
/// # Change Types
///
/// - `RowInserted`: A new row was added under a fresh row id
/// - `RowDeleted`: A row was removed; carries its pre-deletion values
/// - `RowUpdated`: One or more cells of a row changed; carries both images
///
/// Label renames are recorded as one `RowUpdated` per affected row, in
/// ascending row id order.
///
/// # Usage Pattern
///
/// 1. Source table operations generate `TableChange` events
/// 2. Changes wait in the table's pending buffer
/// 3. The engine drains the buffer after each action
/// 4. Each summary plans index updates and reconciles the affected tuples
/// 5. The drained changes go to the transaction's undo journal, which
///    reverts them newest first if the transaction fails

use crate::table::RowId;
use crate::value::Value;

/// Represents a single change to the source table.
///
/// Values are full rows ordered by schema position.
#[derive(Debug, Clone, PartialEq)]
pub enum TableChange {
    RowInserted {
        id: RowId,
        values: Vec<Value>,
    },

    RowDeleted {
        id: RowId,
        values: Vec<Value>,
    },

    RowUpdated {
        id: RowId,
        old_values: Vec<Value>,
        new_values: Vec<Value>,
    },
}

impl TableChange {
    /// Returns the source row affected by this change
    pub fn row_id(&self) -> RowId {
        match self {
            TableChange::RowInserted { id, .. } => *id,
            TableChange::RowDeleted { id, .. } => *id,
            TableChange::RowUpdated { id, .. } => *id,
        }
    }

    /// Returns true if the value at schema position `position` differs
    /// between the pre- and post-image of this change
    pub fn touches(&self, position: usize) -> bool {
        match self {
            TableChange::RowInserted { .. } | TableChange::RowDeleted { .. } => true,
            TableChange::RowUpdated {
                old_values,
                new_values,
                ..
            } => old_values.get(position) != new_values.get(position),
        }
    }
}
