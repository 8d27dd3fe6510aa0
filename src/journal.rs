/// Transaction Undo Journal
///
/// Records what a running transaction has done so a failure can be taken
/// back without copying engine state up front. Drained source changes are
/// kept as they are, each summary records its own undo state the first time
/// a change reaches it, and schema operations push one step each.
///
/// # Rollback Order
///
/// 1. Source rows, newest change first, then the row id counter
/// 2. Each summary's index ops and rows
/// 3. Schema steps, newest first

use crate::changeset::TableChange;
use crate::column::ColumnKind;
use crate::index::LookupIndex;
use crate::summary::{SummaryId, SummaryTable, SummaryUndo};
use crate::table::{RowId, SourceTable};
use crate::value::Value;
use log::warn;
use std::collections::{BTreeMap, BTreeSet};

/// A schema-level step and what it replaced
#[derive(Debug)]
pub(crate) enum SchemaUndo {
    /// A summary was built under `id`, replacing `previous` if there was one
    SummaryBuilt {
        id: SummaryId,
        previous: Option<(SummaryTable, LookupIndex)>,
    },
    ColumnRenamed {
        old: String,
        new: String,
    },
    /// Kind and values of a column before it was converted
    ColumnConverted {
        column: String,
        kind: ColumnKind,
        values: Vec<(RowId, Value)>,
    },
}

#[derive(Debug, Default)]
pub(crate) struct Journal {
    next_row_id: RowId,
    next_summary_id: SummaryId,
    /// Source changes applied so far, oldest first
    rows: Vec<TableChange>,
    summaries: BTreeMap<SummaryId, SummaryUndo>,
    schema: Vec<SchemaUndo>,
}

impl Journal {
    pub(crate) fn begin(next_row_id: RowId, next_summary_id: SummaryId) -> Self {
        Journal {
            next_row_id,
            next_summary_id,
            ..Journal::default()
        }
    }

    pub(crate) fn next_summary_id(&self) -> SummaryId {
        self.next_summary_id
    }

    pub(crate) fn record_rows(&mut self, changes: Vec<TableChange>) {
        self.rows.extend(changes);
    }

    pub(crate) fn record_schema(&mut self, step: SchemaUndo) {
        self.schema.push(step);
    }

    /// Undo state of a summary, started on first use
    pub(crate) fn summary_undo(&mut self, id: SummaryId, summary: &SummaryTable) -> &mut SummaryUndo {
        self.summaries.entry(id).or_insert_with(|| summary.begin_undo())
    }

    pub(crate) fn summary_undos(&self) -> impl Iterator<Item = (SummaryId, &SummaryUndo)> + '_ {
        self.summaries.iter().map(|(id, undo)| (*id, undo))
    }

    /// Source rows changed by the transaction, live or not
    pub(crate) fn touched_rows(&self) -> BTreeSet<RowId> {
        self.rows.iter().map(TableChange::row_id).collect()
    }

    /// Summaries built from scratch during the transaction
    pub(crate) fn rebuilt(&self) -> impl Iterator<Item = SummaryId> + '_ {
        self.schema.iter().filter_map(|step| match step {
            SchemaUndo::SummaryBuilt { id, .. } => Some(*id),
            SchemaUndo::ColumnRenamed { .. } | SchemaUndo::ColumnConverted { .. } => None,
        })
    }

    /// Take the transaction back. Returns the summaries whose rows could not
    /// be restored in place; the caller rebuilds those from the source.
    pub(crate) fn rollback(
        self,
        source: &mut SourceTable,
        summaries: &mut BTreeMap<SummaryId, SummaryTable>,
    ) -> Vec<SummaryId> {
        let pending = source.drain_changes();
        for change in self.rows.into_iter().chain(pending).rev() {
            source.revert(change);
        }
        source.rewind_row_ids(self.next_row_id);

        let mut failed = Vec::new();
        for (id, undo) in self.summaries {
            let (Some(summary), Some(index)) = (summaries.get_mut(&id), source.index_mut(id)) else {
                continue;
            };
            if let Err(err) = summary.rollback(undo, index) {
                warn!("summary {} rollback failed: {}", id, err);
                failed.push(id);
            }
        }

        for step in self.schema.into_iter().rev() {
            match step {
                SchemaUndo::SummaryBuilt { id, previous } => {
                    summaries.remove(&id);
                    source.remove_index(id);
                    if let Some((summary, index)) = previous {
                        source.register_index(id, index);
                        summaries.insert(id, summary);
                    }
                }
                SchemaUndo::ColumnRenamed { old, new } => {
                    if let Err(err) = source.rename_column(&new, &old) {
                        warn!("cannot rename '{}' back to '{}': {}", new, old, err);
                        continue;
                    }
                    for summary in summaries.values_mut() {
                        summary.rename_source_column(&new, &old);
                    }
                }
                SchemaUndo::ColumnConverted { column, kind, values } => {
                    if let Err(err) = source.restore_column(&column, kind, values) {
                        warn!("cannot restore column '{}': {}", column, err);
                    }
                }
            }
        }

        failed
    }
}
